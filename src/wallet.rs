use actix::Addr;
use actix_web::{get, post, web, HttpResponse};
use serde::Deserialize;
use serde_json::json;
use tracing::info;

use crate::db::{CreditOutcome, Store};
use crate::error::{ApiError, ApiResult};
use crate::gateway::{cents_to_dollars, dollars_to_cents, StripeClient};
use crate::rooms::{Event, Publish, RoomServer};

#[get("/wallet/{goalId}")]
pub async fn get_balance(
    store: web::Data<Store>,
    goal_id: web::Path<String>,
) -> ApiResult<HttpResponse> {
    let group = store
        .find_group(&goal_id)
        .await?
        .ok_or(ApiError::NotFound("Goal"))?;
    Ok(HttpResponse::Ok().json(json!({ "balance": group.wallet_balance })))
}

#[derive(Deserialize)]
pub struct CreateIntentRequest {
    amount: f64,
    #[serde(rename = "goalId")]
    goal_id: String,
}

/// Step 1 of a contribution: create a charge intent at the gateway and hand
/// the client secret back for the browser payment flow. Nothing is credited
/// here.
#[post("/create-payment-intent")]
pub async fn create_payment_intent(
    store: web::Data<Store>,
    stripe: web::Data<StripeClient>,
    json: web::Json<CreateIntentRequest>,
) -> ApiResult<HttpResponse> {
    let req = json.into_inner();
    if !(req.amount > 0.0) {
        return Err(ApiError::Validation(
            "Contribution amount must be positive.".into(),
        ));
    }
    store
        .find_group(&req.goal_id)
        .await?
        .ok_or(ApiError::NotFound("Goal"))?;

    let intent = stripe
        .create_intent(dollars_to_cents(req.amount), &req.goal_id)
        .await?;
    let client_secret = intent
        .client_secret
        .ok_or_else(|| ApiError::external("payment gateway", "intent missing client secret"))?;
    Ok(HttpResponse::Ok().json(json!({ "clientSecret": client_secret })))
}

#[derive(Deserialize)]
pub struct ConfirmRequest {
    #[serde(rename = "paymentIntentId")]
    payment_intent_id: String,
    #[serde(rename = "goalId")]
    goal_id: String,
}

/// Step 2: confirm settlement with the gateway, then credit the wallet. The
/// amount comes from the gateway's copy of the intent, never from the
/// client, and replaying a confirmation is a no-op that reports the
/// unchanged balance.
#[post("/verify-contribution")]
pub async fn verify_contribution(
    store: web::Data<Store>,
    stripe: web::Data<StripeClient>,
    rooms: web::Data<Addr<RoomServer>>,
    json: web::Json<ConfirmRequest>,
) -> ApiResult<HttpResponse> {
    let req = json.into_inner();

    let intent = stripe.retrieve_intent(&req.payment_intent_id).await?;
    if !intent.is_settled() {
        return Err(ApiError::Validation("Payment not successful".into()));
    }

    let amount = cents_to_dollars(intent.amount);
    match store.credit_wallet(&req.goal_id, &intent.id, amount).await? {
        CreditOutcome::Credited(balance) => {
            info!(goal_id = %req.goal_id, amount, balance, "contribution credited");
            rooms.do_send(Publish {
                goal_id: req.goal_id,
                event: Event::WalletUpdate {
                    balance,
                    message: format!("Funds added: ${amount}"),
                },
            });
            Ok(HttpResponse::Ok().json(json!({ "success": true, "newBalance": balance })))
        }
        CreditOutcome::AlreadyApplied(balance) => Ok(HttpResponse::Ok()
            .json(json!({ "message": "Already processed", "balance": balance }))),
    }
}
