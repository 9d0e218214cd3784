//! REST order-gateway client with HMAC-signed requests.
//!
//! Failure mapping: 4xx and explicit REJECTED acks are deterministic
//! (`GatewayError::Rejected`), everything network-shaped is transient. The
//! caller decides retry; the default policy is no retry, the signal is
//! gone either way.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chrono::Utc;
use hmac::{Hmac, Mac};
use reqwest::Client;
use serde::Deserialize;
use sha2::Sha256;
use std::time::Duration;
use tracing::debug;

use super::{LimitOrderRequest, OrderAck, OrderStatus};
use crate::error::GatewayError;

type HmacSha256 = Hmac<Sha256>;

/// Per-call deadline for order submission. Expiry is a transient failure.
const ORDER_DEADLINE: Duration = Duration::from_secs(10);
/// Per-call deadline for auxiliary reads.
const QUERY_DEADLINE: Duration = Duration::from_secs(5);

#[async_trait]
pub trait OrderGateway: Send + Sync {
    /// Submit a limit order. At-most-once from the caller's perspective:
    /// a transient failure drops the order, it is never resubmitted here.
    async fn place_limit_order(&self, req: &LimitOrderRequest) -> Result<OrderAck, GatewayError>;

    /// Available bankroll at the venue (USD).
    async fn fetch_balance(&self) -> Result<f64, GatewayError>;
}

#[derive(Debug, Clone)]
pub struct GatewayCredentials {
    pub api_key: String,
    pub secret: String,
    pub passphrase: String,
}

pub struct ClobGatewayClient {
    client: Client,
    base_url: String,
    credentials: GatewayCredentials,
}

#[derive(Debug, Deserialize)]
struct OrderResponse {
    order_id: String,
    status: String,
    #[serde(default)]
    reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BalanceResponse {
    balance_usd: f64,
}

impl ClobGatewayClient {
    pub fn new(base_url: String, credentials: GatewayCredentials) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(ORDER_DEADLINE)
            .build()
            .map_err(|e| anyhow::anyhow!("build gateway http client: {e}"))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            credentials,
        })
    }

    /// HMAC-SHA256 over `timestamp + method + path + body`, base64-encoded.
    fn sign(&self, timestamp: i64, method: &str, path: &str, body: &str) -> String {
        let payload = format!("{timestamp}{method}{path}{body}");
        let mut mac = HmacSha256::new_from_slice(self.credentials.secret.as_bytes())
            .expect("hmac accepts any key length");
        mac.update(payload.as_bytes());
        BASE64.encode(mac.finalize().into_bytes())
    }

    fn signed_request(
        &self,
        method: reqwest::Method,
        path: &str,
        body: Option<String>,
    ) -> reqwest::RequestBuilder {
        let timestamp = Utc::now().timestamp();
        let body_str = body.as_deref().unwrap_or("");
        let signature = self.sign(timestamp, method.as_str(), path, body_str);

        let mut builder = self
            .client
            .request(method, format!("{}{}", self.base_url, path))
            .header("X-API-KEY", &self.credentials.api_key)
            .header("X-PASSPHRASE", &self.credentials.passphrase)
            .header("X-TIMESTAMP", timestamp.to_string())
            .header("X-SIGNATURE", signature);
        if let Some(body) = body {
            builder = builder
                .header("Content-Type", "application/json")
                .body(body);
        }
        builder
    }

    async fn execute<T: serde::de::DeserializeOwned>(
        &self,
        builder: reqwest::RequestBuilder,
        deadline: Duration,
    ) -> Result<T, GatewayError> {
        let response = tokio::time::timeout(deadline, builder.send())
            .await
            .map_err(|_| GatewayError::Transient("gateway deadline expired".into()))?
            .map_err(|e| GatewayError::Transient(e.to_string()))?;

        let status = response.status();
        if status.is_client_error() {
            let text = response.text().await.unwrap_or_default();
            return Err(GatewayError::Rejected(format!("{status}: {text}")));
        }
        if !status.is_success() {
            return Err(GatewayError::Transient(format!("gateway returned {status}")));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| GatewayError::Transient(format!("parse gateway response: {e}")))
    }
}

#[async_trait]
impl OrderGateway for ClobGatewayClient {
    async fn place_limit_order(&self, req: &LimitOrderRequest) -> Result<OrderAck, GatewayError> {
        if !(req.price > 0.0 && req.price < 1.0) {
            return Err(GatewayError::Rejected(format!(
                "limit price {} outside (0, 1)",
                req.price
            )));
        }
        if req.shares <= 0.0 {
            return Err(GatewayError::Rejected("non-positive share count".into()));
        }

        let body = serde_json::json!({
            "client_order_id": req.client_order_id,
            "token_id": req.token_id,
            "side": req.side.as_str(),
            "price": req.price,
            "shares": req.shares,
        })
        .to_string();

        let response: OrderResponse = self
            .execute(
                self.signed_request(reqwest::Method::POST, "/orders", Some(body)),
                ORDER_DEADLINE,
            )
            .await?;

        let status = match response.status.as_str() {
            "LIVE" => OrderStatus::Live,
            "FILLED" => OrderStatus::Filled,
            "PARTIAL" => OrderStatus::Partial,
            "REJECTED" => {
                return Err(GatewayError::Rejected(
                    response.reason.unwrap_or_else(|| "rejected by venue".into()),
                ));
            }
            other => {
                return Err(GatewayError::Transient(format!(
                    "unknown order status {other}"
                )));
            }
        };

        debug!(
            order_id = %response.order_id,
            token = %req.token_id,
            side = req.side.as_str(),
            price = req.price,
            shares = req.shares,
            "order accepted"
        );

        Ok(OrderAck {
            order_id: response.order_id,
            status,
        })
    }

    async fn fetch_balance(&self) -> Result<f64, GatewayError> {
        let response: BalanceResponse = self
            .execute(
                self.signed_request(reqwest::Method::GET, "/bankroll", None),
                QUERY_DEADLINE,
            )
            .await?;
        Ok(response.balance_usd)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Side;

    fn client() -> ClobGatewayClient {
        ClobGatewayClient::new(
            "https://gateway.example".into(),
            GatewayCredentials {
                api_key: "key".into(),
                secret: "secret".into(),
                passphrase: "pass".into(),
            },
        )
        .unwrap()
    }

    #[test]
    fn signature_is_deterministic() {
        let c = client();
        let a = c.sign(1_700_000_000, "POST", "/orders", "{}");
        let b = c.sign(1_700_000_000, "POST", "/orders", "{}");
        assert_eq!(a, b);
        // Different body, different signature.
        let c2 = c.sign(1_700_000_000, "POST", "/orders", r#"{"x":1}"#);
        assert_ne!(a, c2);
    }

    #[tokio::test]
    async fn invalid_parameters_reject_without_network() {
        let c = client();
        let bad_price = LimitOrderRequest {
            client_order_id: "c1".into(),
            token_id: "tok".into(),
            side: Side::Buy,
            price: 1.5,
            shares: 10.0,
        };
        assert!(matches!(
            c.place_limit_order(&bad_price).await,
            Err(GatewayError::Rejected(_))
        ));

        let bad_shares = LimitOrderRequest {
            client_order_id: "c2".into(),
            token_id: "tok".into(),
            side: Side::Buy,
            price: 0.5,
            shares: 0.0,
        };
        assert!(matches!(
            c.place_limit_order(&bad_shares).await,
            Err(GatewayError::Rejected(_))
        ));
    }
}
