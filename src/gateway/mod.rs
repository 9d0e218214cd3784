//! Order-gateway access. One write operation (`place_limit_order`) plus the
//! auxiliary balance read; everything else about the venue is out of scope.

pub mod client;
pub mod paper;

pub use client::{ClobGatewayClient, GatewayCredentials, OrderGateway};
pub use paper::PaperGateway;

use serde::{Deserialize, Serialize};

use crate::models::Side;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitOrderRequest {
    pub client_order_id: String,
    pub token_id: String,
    pub side: Side,
    /// Limit price (0..1) for binary outcome shares.
    pub price: f64,
    pub shares: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderStatus {
    Live,
    Rejected,
    Filled,
    Partial,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderAck {
    pub order_id: String,
    pub status: OrderStatus,
}
