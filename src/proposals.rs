use actix::Addr;
use actix_web::{get, post, web, HttpResponse};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use tracing::{error, info};
use uuid::Uuid;

use crate::arbiter::{AdjudicationContext, ArbiterClient, ArbiterDecision, ArbiterVerdict};
use crate::db::{DebitOutcome, Store};
use crate::error::{ApiError, ApiResult};
use crate::rooms::{Event, Publish, RoomServer};
use crate::schemas::{Proposal, ProposalStatus, Vote, VoteChoice};

const INVALID_STATE: &str = "Proposal not valid for finalization.";
const SHORTFALL_REASON: &str = "Approved by arbiter, but insufficient funds in wallet.";

#[derive(Deserialize)]
pub struct CreateProposalRequest {
    #[serde(rename = "goalId")]
    goal_id: String,
    username: String,
    description: String,
    amount: f64,
    recipient: String,
}

#[post("/proposals/create")]
pub async fn create_proposal(
    store: web::Data<Store>,
    rooms: web::Data<Addr<RoomServer>>,
    json: web::Json<CreateProposalRequest>,
) -> ApiResult<HttpResponse> {
    let req = json.into_inner();
    if req.description.trim().is_empty() {
        return Err(ApiError::Validation("Description is required.".into()));
    }
    if !(req.amount > 0.0) {
        return Err(ApiError::Validation("Amount must be positive.".into()));
    }
    if req.recipient.trim().is_empty() {
        return Err(ApiError::Validation("Recipient is required.".into()));
    }

    store
        .find_user(&req.username)
        .await?
        .ok_or(ApiError::NotFound("User"))?;
    let group = store
        .find_group(&req.goal_id)
        .await?
        .ok_or(ApiError::NotFound("Goal"))?;
    if !group.users_id.contains(&req.username) {
        return Err(ApiError::Validation(
            "Only group members can create proposals.".into(),
        ));
    }

    let proposal = Proposal {
        proposal_id: Uuid::new_v4().to_string(),
        goal_id: group.goal_id.clone(),
        requester: req.username.clone(),
        description: req.description,
        amount: req.amount,
        recipient: req.recipient,
        status: ProposalStatus::Pending,
        votes: vec![],
        ai_reason: None,
        created_at: Utc::now(),
    };
    store.insert_proposal(&proposal).await?;

    rooms.do_send(Publish {
        goal_id: group.goal_id.clone(),
        event: Event::Notification {
            text: format!(
                "New spending proposal by {}: ${}",
                req.username, proposal.amount
            ),
        },
    });
    rooms.do_send(Publish {
        goal_id: group.goal_id,
        event: Event::RefreshProposals,
    });

    Ok(HttpResponse::Created().json(json!({ "message": "Proposal created" })))
}

/// Stable pending-first ordering on a newest-first list: open proposals
/// surface on top, resolved ones keep their recency order below.
fn sort_pending_first(proposals: &mut [Proposal]) {
    proposals.sort_by_key(|p| p.status != ProposalStatus::Pending);
}

#[get("/proposals/{goalId}")]
pub async fn list_proposals(
    store: web::Data<Store>,
    goal_id: web::Path<String>,
) -> ApiResult<HttpResponse> {
    let mut proposals = store.proposals_for_goal(&goal_id).await?;
    sort_pending_first(&mut proposals);
    Ok(HttpResponse::Ok().json(proposals))
}

#[derive(Deserialize)]
pub struct VoteRequest {
    #[serde(rename = "proposalId")]
    proposal_id: String,
    username: String,
    vote: VoteChoice,
    comment: Option<String>,
}

/// Records a vote with latest-wins semantics. Votes on resolved proposals
/// are accepted and stored, they just no longer influence settlement.
#[post("/proposals/vote")]
pub async fn vote(
    store: web::Data<Store>,
    rooms: web::Data<Addr<RoomServer>>,
    json: web::Json<VoteRequest>,
) -> ApiResult<HttpResponse> {
    let req = json.into_inner();
    let proposal = store
        .find_proposal(&req.proposal_id)
        .await?
        .ok_or(ApiError::NotFound("Proposal"))?;

    let recorded = store
        .record_vote(
            &req.proposal_id,
            &Vote {
                user: req.username,
                vote: req.vote,
                comment: req.comment,
            },
        )
        .await?;
    if !recorded {
        return Err(ApiError::NotFound("Proposal"));
    }

    rooms.do_send(Publish {
        goal_id: proposal.goal_id,
        event: Event::RefreshProposals,
    });
    Ok(HttpResponse::Ok().json(json!({ "message": "Vote recorded" })))
}

/// The outcome applied to a proposal once the arbiter has spoken and the
/// wallet has (or has not) been debited.
#[derive(Debug, PartialEq)]
struct Settlement {
    status: ProposalStatus,
    reason: String,
    debited: bool,
}

/// Collapses verdict + debit result into the terminal state. A Pay verdict
/// only approves when the debit went through; a shortfall overrides it to a
/// rejection with an amended reason.
fn settle(verdict: ArbiterVerdict, debit: Option<DebitOutcome>) -> Settlement {
    match (verdict.decision, debit) {
        (ArbiterDecision::Pay, Some(DebitOutcome::Debited)) => Settlement {
            status: ProposalStatus::Approved,
            reason: verdict.reason,
            debited: true,
        },
        (ArbiterDecision::Pay, _) => Settlement {
            status: ProposalStatus::Rejected,
            reason: SHORTFALL_REASON.to_string(),
            debited: false,
        },
        (ArbiterDecision::Cancel, _) => Settlement {
            status: ProposalStatus::Rejected,
            reason: verdict.reason,
            debited: false,
        },
    }
}

fn outcome_message(settlement: &Settlement, amount: f64, recipient: &str) -> String {
    if settlement.debited {
        format!("Proposal Approved! ${amount} sent to {recipient}.")
    } else {
        format!("Proposal Rejected: {}", settlement.reason)
    }
}

#[derive(Deserialize)]
pub struct FinalizeRequest {
    #[serde(rename = "proposalId")]
    proposal_id: String,
}

/// Submits a pending proposal to the arbiter and settles it. Either the
/// wallet is debited and the proposal approved, or nothing is debited and
/// the proposal is rejected; an arbiter failure leaves it pending for a
/// retry.
#[post("/proposals/finalize")]
pub async fn finalize(
    store: web::Data<Store>,
    arbiter: web::Data<ArbiterClient>,
    rooms: web::Data<Addr<RoomServer>>,
    json: web::Json<FinalizeRequest>,
) -> ApiResult<HttpResponse> {
    let req = json.into_inner();
    let proposal = store
        .find_proposal(&req.proposal_id)
        .await?
        .ok_or(ApiError::NotFound("Proposal"))?;
    if proposal.status != ProposalStatus::Pending {
        return Err(ApiError::Conflict(INVALID_STATE.into()));
    }
    let group = store
        .find_group(&proposal.goal_id)
        .await?
        .ok_or(ApiError::NotFound("Goal"))?;

    let verdict = arbiter
        .adjudicate(&AdjudicationContext {
            group_goal: &group.m_goal,
            wallet_balance: group.wallet_balance,
            requester: &proposal.requester,
            amount: proposal.amount,
            recipient: &proposal.recipient,
            description: &proposal.description,
            votes: &proposal.votes,
        })
        .await?;
    let decision = verdict.decision;

    let debit = match decision {
        ArbiterDecision::Pay => Some(store.debit_wallet(&proposal.goal_id, proposal.amount).await?),
        ArbiterDecision::Cancel => None,
    };
    let settlement = settle(verdict, debit);

    let claimed = store
        .settle_proposal(&req.proposal_id, settlement.status, &settlement.reason)
        .await?;
    if !claimed {
        // A concurrent finalize won between our status check and the write.
        if settlement.debited {
            error!(
                proposal_id = %req.proposal_id,
                amount = proposal.amount,
                "debited wallet but lost the settlement write; needs reconciliation"
            );
        }
        return Err(ApiError::Conflict(INVALID_STATE.into()));
    }

    info!(
        proposal_id = %req.proposal_id,
        status = settlement.status.as_str(),
        "proposal settled"
    );

    let balance = if settlement.debited {
        group.wallet_balance - proposal.amount
    } else {
        group.wallet_balance
    };
    rooms.do_send(Publish {
        goal_id: proposal.goal_id.clone(),
        event: Event::WalletUpdate {
            balance,
            message: outcome_message(&settlement, proposal.amount, &proposal.recipient),
        },
    });
    rooms.do_send(Publish {
        goal_id: proposal.goal_id,
        event: Event::RefreshProposals,
    });

    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "decision": decision,
        "reason": settlement.reason,
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn proposal(id: &str, status: ProposalStatus, ts: i64) -> Proposal {
        Proposal {
            proposal_id: id.to_string(),
            goal_id: "g1".to_string(),
            requester: "ada".to_string(),
            description: "supplies".to_string(),
            amount: 10.0,
            recipient: "shop".to_string(),
            status,
            votes: vec![],
            ai_reason: None,
            created_at: Utc.timestamp_opt(ts, 0).unwrap(),
        }
    }

    fn verdict(decision: ArbiterDecision, reason: &str) -> ArbiterVerdict {
        ArbiterVerdict {
            decision,
            reason: reason.to_string(),
        }
    }

    #[test]
    fn pay_with_funds_approves_and_debits() {
        let s = settle(verdict(ArbiterDecision::Pay, "ok"), Some(DebitOutcome::Debited));
        assert_eq!(s.status, ProposalStatus::Approved);
        assert!(s.debited);
        assert_eq!(s.reason, "ok");
    }

    #[test]
    fn pay_without_funds_rejects_with_amended_reason() {
        let s = settle(
            verdict(ArbiterDecision::Pay, "ok"),
            Some(DebitOutcome::InsufficientFunds),
        );
        assert_eq!(s.status, ProposalStatus::Rejected);
        assert!(!s.debited);
        assert_eq!(s.reason, SHORTFALL_REASON);
    }

    #[test]
    fn cancel_rejects_without_touching_the_wallet() {
        let s = settle(verdict(ArbiterDecision::Cancel, "off-goal"), None);
        assert_eq!(s.status, ProposalStatus::Rejected);
        assert!(!s.debited);
        assert_eq!(s.reason, "off-goal");
    }

    #[test]
    fn pending_proposals_lead_and_recency_is_preserved() {
        let mut list = vec![
            proposal("newest-approved", ProposalStatus::Approved, 400),
            proposal("newer-pending", ProposalStatus::Pending, 300),
            proposal("old-rejected", ProposalStatus::Rejected, 200),
            proposal("oldest-pending", ProposalStatus::Pending, 100),
        ];
        sort_pending_first(&mut list);
        let ids: Vec<&str> = list.iter().map(|p| p.proposal_id.as_str()).collect();
        assert_eq!(
            ids,
            vec!["newer-pending", "oldest-pending", "newest-approved", "old-rejected"]
        );
    }

    #[test]
    fn outcome_messages_mirror_the_settlement() {
        let approved = Settlement {
            status: ProposalStatus::Approved,
            reason: "fine".into(),
            debited: true,
        };
        assert_eq!(
            outcome_message(&approved, 60.0, "Tech Store"),
            "Proposal Approved! $60 sent to Tech Store."
        );
        let rejected = Settlement {
            status: ProposalStatus::Rejected,
            reason: "off-goal".into(),
            debited: false,
        };
        assert_eq!(
            outcome_message(&rejected, 60.0, "Tech Store"),
            "Proposal Rejected: off-goal"
        );
    }
}
