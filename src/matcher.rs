use actix::Addr;
use actix_web::{get, web, HttpResponse};
use futures::future::try_join_all;
use tracing::info;

use crate::config::Config;
use crate::db::Store;
use crate::error::{ApiError, ApiResult};
use crate::rooms::{Event, Publish, RoomServer};
use crate::schemas::Group;
use crate::similarity;

/// Minimum similarity for joining an existing group instead of founding a
/// new one.
pub const MATCH_THRESHOLD: f64 = 0.85;

/// Index of the strictly-highest score; ties keep the earliest entry, so
/// repeated matching over the same group list stays deterministic.
fn best_index(scores: &[f64]) -> Option<usize> {
    let mut best: Option<usize> = None;
    for (i, &score) in scores.iter().enumerate() {
        if best.map_or(true, |b| score > scores[b]) {
            best = Some(i);
        }
    }
    best
}

/// Places a user in a group: returns the existing one on re-match, joins the
/// closest sufficiently-similar group, or founds a new group around the
/// user's goal.
///
/// Two users with no existing compatible group can race here and each found
/// their own group; that is accepted rather than serialized.
#[get("/match/{username}")]
pub async fn match_user(
    store: web::Data<Store>,
    config: web::Data<Config>,
    rooms: web::Data<Addr<RoomServer>>,
    username: web::Path<String>,
) -> ApiResult<HttpResponse> {
    let username = username.into_inner();
    let user = store
        .find_user(&username)
        .await?
        .ok_or(ApiError::NotFound("User"))?;

    // Idempotent re-match: already-grouped users get their group back.
    if let Some(goal_id) = &user.goal_id {
        let group = store
            .find_group(goal_id)
            .await?
            .ok_or(ApiError::NotFound("Goal"))?;
        return Ok(HttpResponse::Ok().json(group));
    }

    let goals = store.goal_summaries().await?;
    if !goals.is_empty() {
        let engine = similarity::shared_engine(&config).await?;
        let scores = try_join_all(
            goals
                .iter()
                .map(|candidate| engine.score(&user.goal, &candidate.m_goal)),
        )
        .await?;

        if let Some(i) = best_index(&scores) {
            if scores[i] >= MATCH_THRESHOLD {
                let goal_id = goals[i].goal_id.clone();
                store.add_member(&goal_id, &user.u_name).await?;
                store.set_user_goal(&user.u_name, &goal_id).await?;
                let group = store
                    .find_group(&goal_id)
                    .await?
                    .ok_or(ApiError::NotFound("Goal"))?;
                info!(user = %user.u_name, %goal_id, score = scores[i], "matched into existing group");
                rooms.do_send(Publish {
                    goal_id,
                    event: Event::Notification {
                        text: format!("{} has joined the group.", user.u_name),
                    },
                });
                return Ok(HttpResponse::Ok().json(group));
            }
        }
    }

    // No group close enough: found a new one around this user's goal.
    let group = Group::new(user.goal.clone(), user.u_name.clone());
    store.insert_group(&group).await?;
    store.set_user_goal(&user.u_name, &group.goal_id).await?;
    info!(user = %user.u_name, goal_id = %group.goal_id, "founded new group");
    Ok(HttpResponse::Created().json(group))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn best_index_picks_the_maximum() {
        assert_eq!(best_index(&[0.1, 0.9, 0.4]), Some(1));
    }

    #[test]
    fn ties_keep_the_first_seen_group() {
        assert_eq!(best_index(&[0.9, 0.9, 0.9]), Some(0));
        assert_eq!(best_index(&[0.2, 0.7, 0.7]), Some(1));
    }

    #[test]
    fn empty_scores_have_no_best() {
        assert_eq!(best_index(&[]), None);
    }

    #[test]
    fn repeated_selection_is_deterministic() {
        let scores = [0.3, 0.86, 0.52, 0.86];
        for _ in 0..10 {
            assert_eq!(best_index(&scores), Some(1));
        }
    }

    #[test]
    fn threshold_is_inclusive() {
        let scores = [0.85];
        let i = best_index(&scores).unwrap();
        assert!(scores[i] >= MATCH_THRESHOLD);
    }
}
