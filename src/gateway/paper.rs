//! Paper gateway: accepts every well-formed order and fills it at the limit
//! price. Used for dry runs and by the test suite, which drives rejection
//! and transient paths explicitly via the switches below.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tracing::info;

use super::{LimitOrderRequest, OrderAck, OrderGateway, OrderStatus};
use crate::error::GatewayError;

pub struct PaperGateway {
    balance_usd: f64,
    counter: AtomicU64,
    reject_next: AtomicBool,
    fail_next: AtomicBool,
    submitted: Mutex<Vec<LimitOrderRequest>>,
}

impl PaperGateway {
    pub fn new(balance_usd: f64) -> Self {
        Self {
            balance_usd,
            counter: AtomicU64::new(0),
            reject_next: AtomicBool::new(false),
            fail_next: AtomicBool::new(false),
            submitted: Mutex::new(Vec::new()),
        }
    }

    /// Force the next order to fail deterministically (venue rejection).
    pub fn reject_next(&self) {
        self.reject_next.store(true, Ordering::SeqCst);
    }

    /// Force the next order to fail transiently (network-class error).
    pub fn fail_next(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }

    /// All orders this gateway has accepted, in submission order.
    pub fn submitted(&self) -> Vec<LimitOrderRequest> {
        self.submitted.lock().clone()
    }

    pub fn submitted_count(&self) -> usize {
        self.submitted.lock().len()
    }
}

#[async_trait]
impl OrderGateway for PaperGateway {
    async fn place_limit_order(&self, req: &LimitOrderRequest) -> Result<OrderAck, GatewayError> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(GatewayError::Transient("paper: injected outage".into()));
        }
        if self.reject_next.swap(false, Ordering::SeqCst) {
            return Err(GatewayError::Rejected("paper: injected rejection".into()));
        }
        if !(req.price > 0.0 && req.price < 1.0) {
            return Err(GatewayError::Rejected(format!(
                "limit price {} outside (0, 1)",
                req.price
            )));
        }
        if req.shares <= 0.0 {
            return Err(GatewayError::Rejected("non-positive share count".into()));
        }

        let seq = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        self.submitted.lock().push(req.clone());
        info!(
            token = %req.token_id,
            side = req.side.as_str(),
            price = req.price,
            shares = req.shares,
            "paper order filled at limit"
        );

        Ok(OrderAck {
            order_id: format!("paper-{seq}"),
            status: OrderStatus::Live,
        })
    }

    async fn fetch_balance(&self) -> Result<f64, GatewayError> {
        Ok(self.balance_usd)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Side;

    fn order(id: &str) -> LimitOrderRequest {
        LimitOrderRequest {
            client_order_id: id.to_string(),
            token_id: "tok".into(),
            side: Side::Buy,
            price: 0.51,
            shares: 10.0,
        }
    }

    #[tokio::test]
    async fn accepts_and_records_orders() {
        let gw = PaperGateway::new(10_000.0);
        let ack = gw.place_limit_order(&order("a")).await.unwrap();
        assert_eq!(ack.order_id, "paper-1");
        assert_eq!(ack.status, OrderStatus::Live);
        assert_eq!(gw.submitted_count(), 1);
        assert_eq!(gw.fetch_balance().await.unwrap(), 10_000.0);
    }

    #[tokio::test]
    async fn injected_failures_fire_once() {
        let gw = PaperGateway::new(10_000.0);
        gw.reject_next();
        assert!(matches!(
            gw.place_limit_order(&order("a")).await,
            Err(GatewayError::Rejected(_))
        ));
        gw.fail_next();
        assert!(matches!(
            gw.place_limit_order(&order("b")).await,
            Err(GatewayError::Transient(_))
        ));
        // Back to normal afterwards.
        assert!(gw.place_limit_order(&order("c")).await.is_ok());
        assert_eq!(gw.submitted_count(), 1);
    }
}
