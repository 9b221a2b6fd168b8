use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type UserName = String;

/// A registered user. `goal_id` stays null until the matcher places the
/// user in a group; a user belongs to at most one group.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct User {
    #[serde(rename = "uName")]
    pub u_name: UserName,
    /// bcrypt hash, never the plain password.
    pub password: String,
    pub goal: String,
    #[serde(rename = "goalId")]
    pub goal_id: Option<String>,
}

/// A matched group of users pooling money toward a shared goal.
///
/// `transactions` is the idempotency ledger: the payment-intent ids already
/// applied to `wallet_balance`. Balance mutations go through the conditional
/// updates in `db`, which keep `wallet_balance >= 0` and the ledger in step
/// with the balance.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct Group {
    #[serde(rename = "goalId")]
    pub goal_id: String,
    /// Canonical goal text new candidates are scored against.
    #[serde(rename = "mGoal")]
    pub m_goal: String,
    #[serde(rename = "usersId")]
    pub users_id: Vec<UserName>,
    #[serde(rename = "walletBalance")]
    pub wallet_balance: f64,
    pub transactions: Vec<String>,
}

impl Group {
    /// A fresh single-member group with an empty wallet.
    pub fn new(goal: String, founder: UserName) -> Self {
        Self {
            goal_id: uuid::Uuid::new_v4().to_string(),
            m_goal: goal,
            users_id: vec![founder],
            wallet_balance: 0.0,
            transactions: vec![],
        }
    }
}

/// Projection of a group used for similarity scoring; membership and
/// balance are irrelevant to the matcher.
#[derive(Clone, Debug, Deserialize)]
pub struct GoalSummary {
    #[serde(rename = "goalId")]
    pub goal_id: String,
    #[serde(rename = "mGoal")]
    pub m_goal: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProposalStatus {
    Pending,
    Approved,
    Rejected,
}

impl ProposalStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Approved => "APPROVED",
            Self::Rejected => "REJECTED",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum VoteChoice {
    Yes,
    No,
}

/// One member's vote on a proposal. At most one vote per user is kept;
/// a newer vote replaces the old one.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct Vote {
    pub user: UserName,
    pub vote: VoteChoice,
    pub comment: Option<String>,
}

/// A request to spend from the group wallet. Status moves out of
/// `Pending` exactly once, to `Approved` (with a matching debit) or
/// `Rejected` (no balance effect).
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct Proposal {
    #[serde(rename = "proposalId")]
    pub proposal_id: String,
    #[serde(rename = "goalId")]
    pub goal_id: String,
    pub requester: UserName,
    pub description: String,
    pub amount: f64,
    pub recipient: String,
    pub status: ProposalStatus,
    pub votes: Vec<Vote>,
    #[serde(rename = "aiReason")]
    pub ai_reason: Option<String>,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn group_documents_use_original_field_names() {
        let group = Group::new("save for a laptop".to_string(), "ada".to_string());
        let value = serde_json::to_value(&group).unwrap();
        assert!(value.get("mGoal").is_some());
        assert!(value.get("usersId").is_some());
        assert!(value.get("walletBalance").is_some());
        assert_eq!(value["walletBalance"], 0.0);
    }

    #[test]
    fn new_groups_get_distinct_ids() {
        let a = Group::new("g".into(), "u".into());
        let b = Group::new("g".into(), "u".into());
        assert_ne!(a.goal_id, b.goal_id);
    }

    #[test]
    fn status_round_trips_as_screaming_case() {
        let json = serde_json::to_string(&ProposalStatus::Pending).unwrap();
        assert_eq!(json, "\"PENDING\"");
        let back: ProposalStatus = serde_json::from_str("\"REJECTED\"").unwrap();
        assert_eq!(back, ProposalStatus::Rejected);
    }

    #[test]
    fn vote_choice_is_lowercase_on_the_wire() {
        assert_eq!(serde_json::to_string(&VoteChoice::Yes).unwrap(), "\"yes\"");
    }
}
