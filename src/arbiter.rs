use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::time::Duration;
use tracing::debug;

use crate::error::{ApiError, ApiResult};
use crate::schemas::{Vote, VoteChoice};

const GENERATE_URL: &str =
    "https://generativelanguage.googleapis.com/v1beta/models/gemini-2.5-flash:generateContent";
const ARBITER_TIMEOUT: Duration = Duration::from_secs(30);

/// The arbiter's binary call on a spending proposal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub enum ArbiterDecision {
    Pay,
    Cancel,
}

#[derive(Clone, Debug, Deserialize)]
pub struct ArbiterVerdict {
    pub decision: ArbiterDecision,
    pub reason: String,
}

/// Everything the arbiter sees about a proposal: the group's goal and
/// balance, the request itself, and the full vote record.
pub struct AdjudicationContext<'a> {
    pub group_goal: &'a str,
    pub wallet_balance: f64,
    pub requester: &'a str,
    pub amount: f64,
    pub recipient: &'a str,
    pub description: &'a str,
    pub votes: &'a [Vote],
}

/// Builds the treasurer prompt. The arbiter holds veto power but is told to
/// follow group consensus unless the request smells like fraud or drifts
/// from the goal.
pub fn build_prompt(ctx: &AdjudicationContext) -> String {
    let mut votes = String::new();
    for v in ctx.votes {
        let choice = match v.vote {
            VoteChoice::Yes => "YES",
            VoteChoice::No => "NO",
        };
        let comment = v.comment.as_deref().unwrap_or("");
        let _ = writeln!(votes, "- {} voted {}: \"{}\"", v.user, choice, comment);
    }
    if votes.is_empty() {
        votes.push_str("(no votes recorded)\n");
    }

    format!(
        r#"You are the Treasurer AI for a collaborative savings group.

Group Goal: "{goal}"
Current Wallet Balance: ${balance}

The Request:
- User "{requester}" wants to spend ${amount}.
- Recipient/Details: "{recipient}"
- Reason: "{description}"

Group Votes:
{votes}
Task:
Analyze if this expense aligns with the Group Goal and if the community supports it.
You have VETO power, but should generally listen to the group unless it's a scam or completely unrelated to the goal.

Return ONLY a JSON object (no markdown):
{{
    "decision": "Pay" or "Cancel",
    "reason": "Short explanation of your decision (max 2 sentences)."
}}"#,
        goal = ctx.group_goal,
        balance = ctx.wallet_balance,
        requester = ctx.requester,
        amount = ctx.amount,
        recipient = ctx.recipient,
        description = ctx.description,
        votes = votes,
    )
}

/// Parses the model output into a verdict. Markdown code fences are
/// stripped; anything that still fails to parse fails the finalize call
/// rather than silently defaulting to Cancel.
pub fn parse_verdict(raw: &str) -> ApiResult<ArbiterVerdict> {
    let cleaned = raw.replace("```json", "").replace("```", "");
    serde_json::from_str(cleaned.trim())
        .map_err(|e| ApiError::external("arbiter", format!("unparseable verdict: {e}")))
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    contents: Vec<Content<'a>>,
}

#[derive(Serialize)]
struct Content<'a> {
    parts: Vec<Part<'a>>,
}

#[derive(Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: CandidateContent,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Deserialize)]
struct CandidatePart {
    text: String,
}

#[derive(Clone)]
pub struct ArbiterClient {
    http: reqwest::Client,
    api_key: String,
}

impl ArbiterClient {
    pub fn new(http: reqwest::Client, api_key: String) -> Self {
        Self { http, api_key }
    }

    /// Submits the adjudication context and returns the parsed verdict.
    pub async fn adjudicate(&self, ctx: &AdjudicationContext<'_>) -> ApiResult<ArbiterVerdict> {
        let prompt = build_prompt(ctx);
        let request = GenerateRequest {
            contents: vec![Content {
                parts: vec![Part { text: &prompt }],
            }],
        };

        let response = self
            .http
            .post(GENERATE_URL)
            .timeout(ARBITER_TIMEOUT)
            .query(&[("key", self.api_key.as_str())])
            .json(&request)
            .send()
            .await
            .map_err(|e| ApiError::external("arbiter", e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let snippet: String = body.chars().take(400).collect();
            return Err(ApiError::external("arbiter", format!("{status}: {snippet}")));
        }

        let parsed: GenerateResponse = response
            .json()
            .await
            .map_err(|e| ApiError::external("arbiter", e))?;
        let text = parsed
            .candidates
            .first()
            .and_then(|c| c.content.parts.first())
            .map(|p| p.text.as_str())
            .ok_or_else(|| ApiError::external("arbiter", "empty response"))?;

        let verdict = parse_verdict(text)?;
        debug!(decision = ?verdict.decision, "arbiter verdict");
        Ok(verdict)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx_with_votes(votes: &[Vote]) -> AdjudicationContext<'_> {
        AdjudicationContext {
            group_goal: "save for a laptop",
            wallet_balance: 100.0,
            requester: "ada",
            amount: 60.0,
            recipient: "Tech Store",
            description: "Refurbished ThinkPad",
            votes,
        }
    }

    #[test]
    fn prompt_carries_goal_balance_and_votes() {
        let votes = vec![
            Vote {
                user: "bob".into(),
                vote: VoteChoice::Yes,
                comment: Some("good price".into()),
            },
            Vote {
                user: "eve".into(),
                vote: VoteChoice::No,
                comment: None,
            },
        ];
        let prompt = build_prompt(&ctx_with_votes(&votes));
        assert!(prompt.contains("save for a laptop"));
        assert!(prompt.contains("$100"));
        assert!(prompt.contains("- bob voted YES: \"good price\""));
        assert!(prompt.contains("- eve voted NO"));
    }

    #[test]
    fn prompt_handles_empty_vote_list() {
        let prompt = build_prompt(&ctx_with_votes(&[]));
        assert!(prompt.contains("(no votes recorded)"));
    }

    #[test]
    fn verdict_parses_through_markdown_fences() {
        let raw = "```json\n{\"decision\": \"Pay\", \"reason\": \"Aligned and supported.\"}\n```";
        let verdict = parse_verdict(raw).unwrap();
        assert_eq!(verdict.decision, ArbiterDecision::Pay);
        assert_eq!(verdict.reason, "Aligned and supported.");
    }

    #[test]
    fn bare_json_verdict_parses() {
        let verdict = parse_verdict("{\"decision\":\"Cancel\",\"reason\":\"Off-goal.\"}").unwrap();
        assert_eq!(verdict.decision, ArbiterDecision::Cancel);
    }

    #[test]
    fn malformed_output_is_a_failure_not_a_cancel() {
        assert!(parse_verdict("I think you should pay them.").is_err());
        assert!(parse_verdict("{\"decision\": \"Maybe\", \"reason\": \"?\"}").is_err());
        assert!(parse_verdict("").is_err());
    }
}
