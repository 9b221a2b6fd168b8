use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use crate::error::{ApiError, ApiResult};

const API_BASE: &str = "https://api.stripe.com/v1";
const GATEWAY_TIMEOUT: Duration = Duration::from_secs(30);
const SETTLED_STATUS: &str = "succeeded";

/// A charge intent as reported by the gateway. The gateway copy is the
/// authority on status and amount; client-reported values are never used
/// for crediting.
#[derive(Clone, Debug, Deserialize)]
pub struct ChargeIntent {
    pub id: String,
    #[serde(default)]
    pub client_secret: Option<String>,
    pub status: String,
    /// Integer cents.
    pub amount: i64,
}

impl ChargeIntent {
    pub fn is_settled(&self) -> bool {
        self.status == SETTLED_STATUS
    }
}

/// Thin Stripe payment-intent client: create an intent for the browser flow,
/// retrieve it afterwards to confirm settlement.
#[derive(Clone)]
pub struct StripeClient {
    http: reqwest::Client,
    secret_key: String,
}

impl StripeClient {
    pub fn new(http: reqwest::Client, secret_key: String) -> Self {
        Self { http, secret_key }
    }

    /// Creates a charge intent for `amount_cents`, tagged with the group it
    /// funds. Returns the intent carrying the client secret for the
    /// browser-side confirmation flow.
    pub async fn create_intent(&self, amount_cents: i64, goal_id: &str) -> ApiResult<ChargeIntent> {
        let params = [
            ("amount", amount_cents.to_string()),
            ("currency", "usd".to_string()),
            ("metadata[goalId]", goal_id.to_string()),
            ("automatic_payment_methods[enabled]", "true".to_string()),
        ];
        let response = self
            .http
            .post(format!("{API_BASE}/payment_intents"))
            .timeout(GATEWAY_TIMEOUT)
            .basic_auth(&self.secret_key, None::<&str>)
            .form(&params)
            .send()
            .await
            .map_err(|e| ApiError::external("payment gateway", e))?;
        let intent = Self::parse_intent(response).await?;
        debug!(intent = %intent.id, amount_cents, "charge intent created");
        Ok(intent)
    }

    /// Fetches the authoritative state of an intent.
    pub async fn retrieve_intent(&self, intent_id: &str) -> ApiResult<ChargeIntent> {
        let response = self
            .http
            .get(format!("{API_BASE}/payment_intents/{intent_id}"))
            .timeout(GATEWAY_TIMEOUT)
            .basic_auth(&self.secret_key, None::<&str>)
            .send()
            .await
            .map_err(|e| ApiError::external("payment gateway", e))?;
        Self::parse_intent(response).await
    }

    async fn parse_intent(response: reqwest::Response) -> ApiResult<ChargeIntent> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let snippet: String = body.chars().take(400).collect();
            return Err(ApiError::external(
                "payment gateway",
                format!("{status}: {snippet}"),
            ));
        }
        response
            .json()
            .await
            .map_err(|e| ApiError::external("payment gateway", e))
    }
}

/// Dollars-to-cents at the gateway boundary; balances stay in dollars.
pub fn dollars_to_cents(amount: f64) -> i64 {
    (amount * 100.0).round() as i64
}

pub fn cents_to_dollars(cents: i64) -> f64 {
    cents as f64 / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cents_conversion_round_trips() {
        assert_eq!(dollars_to_cents(50.0), 5000);
        assert_eq!(dollars_to_cents(0.1 + 0.2), 30);
        assert_eq!(cents_to_dollars(5000), 50.0);
    }

    #[test]
    fn only_succeeded_intents_count_as_settled() {
        let settled = ChargeIntent {
            id: "pi_1".into(),
            client_secret: None,
            status: "succeeded".into(),
            amount: 5000,
        };
        let pending = ChargeIntent {
            status: "requires_payment_method".into(),
            ..settled.clone()
        };
        assert!(settled.is_settled());
        assert!(!pending.is_settled());
    }

    #[test]
    fn intent_parses_without_client_secret() {
        let intent: ChargeIntent = serde_json::from_str(
            r#"{"id":"pi_9","status":"succeeded","amount":1500}"#,
        )
        .unwrap();
        assert_eq!(intent.amount, 1500);
        assert!(intent.client_secret.is_none());
    }
}
