use bson::{doc, Document};
use futures::stream::TryStreamExt;
use mongodb::options::FindOptions;
use mongodb::{Client, Collection, Database};
use tracing::{debug, info};

use crate::error::{ApiError, ApiResult};
use crate::schemas::{GoalSummary, Group, Proposal, ProposalStatus, User, Vote};

const DB_NAME: &str = "goalpool";
const USERS: &str = "users";
const GROUPS: &str = "groups";
const PROPOSALS: &str = "proposals";

/// Result of applying a contribution to a group wallet.
#[derive(Clone, Debug, PartialEq)]
pub enum CreditOutcome {
    /// Freshly applied; carries the new balance.
    Credited(f64),
    /// The transaction id was already in the ledger; carries the unchanged
    /// balance. Replays are success-with-no-op, not errors.
    AlreadyApplied(f64),
}

/// Result of a conditional wallet debit. Insufficient funds is an expected
/// branch, not an error.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DebitOutcome {
    Debited,
    InsufficientFunds,
}

/// Typed access to the MongoDB collections. The store is the single source
/// of truth; balance and idempotency checks ride inside the update filters
/// so they hold across concurrent requests and across process instances.
#[derive(Clone)]
pub struct Store {
    db: Database,
}

impl Store {
    pub async fn connect(uri: &str) -> Result<Self, mongodb::error::Error> {
        let client = Client::with_uri_str(uri).await?;
        Ok(Self {
            db: client.database(DB_NAME),
        })
    }

    fn users(&self) -> Collection<User> {
        self.db.collection(USERS)
    }

    fn groups(&self) -> Collection<Group> {
        self.db.collection(GROUPS)
    }

    fn proposals(&self) -> Collection<Proposal> {
        self.db.collection(PROPOSALS)
    }

    // --- users ---

    pub async fn find_user(&self, u_name: &str) -> ApiResult<Option<User>> {
        Ok(self.users().find_one(doc! { "uName": u_name }, None).await?)
    }

    pub async fn insert_user(&self, user: &User) -> ApiResult<()> {
        self.users().insert_one(user, None).await?;
        Ok(())
    }

    pub async fn set_user_goal(&self, u_name: &str, goal_id: &str) -> ApiResult<()> {
        self.users()
            .update_one(
                doc! { "uName": u_name },
                doc! { "$set": { "goalId": goal_id } },
                None,
            )
            .await?;
        Ok(())
    }

    // --- groups ---

    pub async fn find_group(&self, goal_id: &str) -> ApiResult<Option<Group>> {
        Ok(self
            .groups()
            .find_one(doc! { "goalId": goal_id }, None)
            .await?)
    }

    /// All groups projected down to id + goal text, in stable find order.
    /// The matcher's tie-break relies on this order not being shuffled.
    pub async fn goal_summaries(&self) -> ApiResult<Vec<GoalSummary>> {
        let options = FindOptions::builder()
            .projection(doc! { "goalId": 1, "mGoal": 1, "_id": 0 })
            .build();
        let cursor = self
            .db
            .collection::<GoalSummary>(GROUPS)
            .find(doc! {}, options)
            .await?;
        Ok(cursor.try_collect().await?)
    }

    pub async fn insert_group(&self, group: &Group) -> ApiResult<()> {
        self.groups().insert_one(group, None).await?;
        info!(goal_id = %group.goal_id, "group created");
        Ok(())
    }

    /// Adds a username to the member set ($addToSet keeps membership unique).
    pub async fn add_member(&self, goal_id: &str, u_name: &str) -> ApiResult<()> {
        self.groups()
            .update_one(
                doc! { "goalId": goal_id },
                doc! { "$addToSet": { "usersId": u_name } },
                None,
            )
            .await?;
        Ok(())
    }

    // --- wallet ledger ---

    /// Credits a settled contribution. The filter excludes groups whose
    /// ledger already holds `transaction_id`, and the update bumps the
    /// balance and appends to the ledger in the same document operation, so
    /// a replayed confirmation can never double-count and the ledger can
    /// never drift from the balance.
    pub async fn credit_wallet(
        &self,
        goal_id: &str,
        transaction_id: &str,
        amount: f64,
    ) -> ApiResult<CreditOutcome> {
        let (filter, update) = credit_query(goal_id, transaction_id, amount);
        let result = self.groups().update_one(filter, update, None).await?;

        if result.modified_count == 1 {
            let group = self
                .find_group(goal_id)
                .await?
                .ok_or(ApiError::NotFound("Goal"))?;
            debug!(goal_id, transaction_id, balance = group.wallet_balance, "wallet credited");
            return Ok(CreditOutcome::Credited(group.wallet_balance));
        }

        // Nothing modified: either the group is unknown or the transaction
        // was applied earlier.
        let group = self
            .find_group(goal_id)
            .await?
            .ok_or(ApiError::NotFound("Goal"))?;
        if group.transactions.iter().any(|t| t == transaction_id) {
            debug!(goal_id, transaction_id, "contribution replay ignored");
            Ok(CreditOutcome::AlreadyApplied(group.wallet_balance))
        } else {
            Err(ApiError::NotFound("Goal"))
        }
    }

    /// Debits `amount` only if the balance covers it; the check and the
    /// decrement are one conditional update, so concurrent debits can never
    /// drive the balance negative.
    pub async fn debit_wallet(&self, goal_id: &str, amount: f64) -> ApiResult<DebitOutcome> {
        let (filter, update) = debit_query(goal_id, amount);
        let result = self.groups().update_one(filter, update, None).await?;
        if result.modified_count == 1 {
            debug!(goal_id, amount, "wallet debited");
            Ok(DebitOutcome::Debited)
        } else {
            Ok(DebitOutcome::InsufficientFunds)
        }
    }

    // --- proposals ---

    pub async fn insert_proposal(&self, proposal: &Proposal) -> ApiResult<()> {
        self.proposals().insert_one(proposal, None).await?;
        info!(proposal_id = %proposal.proposal_id, goal_id = %proposal.goal_id, "proposal created");
        Ok(())
    }

    pub async fn find_proposal(&self, proposal_id: &str) -> ApiResult<Option<Proposal>> {
        Ok(self
            .proposals()
            .find_one(doc! { "proposalId": proposal_id }, None)
            .await?)
    }

    /// Proposals of a group, newest first. The pending-first ordering of the
    /// list endpoint is applied by the caller.
    pub async fn proposals_for_goal(&self, goal_id: &str) -> ApiResult<Vec<Proposal>> {
        let options = FindOptions::builder()
            .sort(doc! { "createdAt": -1 })
            .build();
        let cursor = self
            .proposals()
            .find(doc! { "goalId": goal_id }, options)
            .await?;
        Ok(cursor.try_collect().await?)
    }

    /// Latest-wins vote recording: drop any prior vote by the user, then
    /// append the new one. Returns false when the proposal does not exist.
    pub async fn record_vote(&self, proposal_id: &str, vote: &Vote) -> ApiResult<bool> {
        let pulled = self
            .proposals()
            .update_one(
                doc! { "proposalId": proposal_id },
                doc! { "$pull": { "votes": { "user": vote.user.as_str() } } },
                None,
            )
            .await?;
        if pulled.matched_count == 0 {
            return Ok(false);
        }
        self.proposals()
            .update_one(
                doc! { "proposalId": proposal_id },
                doc! { "$push": { "votes": bson::to_bson(vote)
                    .map_err(|e| ApiError::Internal(e.to_string()))? } },
                None,
            )
            .await?;
        Ok(true)
    }

    /// Writes the terminal status and rationale, conditional on the proposal
    /// still being PENDING. Returns false when a concurrent finalize won.
    pub async fn settle_proposal(
        &self,
        proposal_id: &str,
        status: ProposalStatus,
        reason: &str,
    ) -> ApiResult<bool> {
        let result = self
            .proposals()
            .update_one(
                doc! { "proposalId": proposal_id, "status": ProposalStatus::Pending.as_str() },
                doc! { "$set": { "status": status.as_str(), "aiReason": reason } },
                None,
            )
            .await?;
        Ok(result.modified_count == 1)
    }
}

/// Filter/update pair for an idempotent credit. Kept as a pure builder so
/// the precondition shape is testable without a live database.
fn credit_query(goal_id: &str, transaction_id: &str, amount: f64) -> (Document, Document) {
    (
        doc! {
            "goalId": goal_id,
            // Skip the whole update if this transaction was applied before.
            "transactions": { "$ne": transaction_id },
        },
        doc! {
            "$inc": { "walletBalance": amount },
            "$push": { "transactions": transaction_id },
        },
    )
}

/// Filter/update pair for a balance-guarded debit.
fn debit_query(goal_id: &str, amount: f64) -> (Document, Document) {
    (
        doc! {
            "goalId": goal_id,
            "walletBalance": { "$gte": amount },
        },
        doc! { "$inc": { "walletBalance": -amount } },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn credit_filter_carries_the_idempotency_guard() {
        let (filter, update) = credit_query("g1", "tx1", 50.0);
        assert_eq!(
            filter.get_document("transactions").unwrap().get_str("$ne").unwrap(),
            "tx1"
        );
        // Balance bump and ledger append travel in one update document.
        let inc = update.get_document("$inc").unwrap();
        assert_eq!(inc.get_f64("walletBalance").unwrap(), 50.0);
        let push = update.get_document("$push").unwrap();
        assert_eq!(push.get_str("transactions").unwrap(), "tx1");
    }

    #[test]
    fn debit_filter_requires_covering_balance() {
        let (filter, update) = debit_query("g1", 60.0);
        let guard = filter.get_document("walletBalance").unwrap();
        assert_eq!(guard.get_f64("$gte").unwrap(), 60.0);
        let inc = update.get_document("$inc").unwrap();
        assert_eq!(inc.get_f64("walletBalance").unwrap(), -60.0);
    }
}
