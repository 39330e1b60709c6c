//! Order schema and order-digest computation (spec §3).

use crate::audit::sha256_hex_concat;
use crate::error::GateError;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn as_str(self) -> &'static str {
        match self {
            Side::Buy => "BUY",
            Side::Sell => "SELL",
        }
    }
}

/// An inbound order (spec §3 "Order"). `price` is absent for market orders.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub client_order_id: String,
    pub symbol: String,
    pub side: Side,
    pub qty: u64,
    pub price: Option<f64>,
}

/// Validate the schema-level constraints spec §3 lists for `Order`: `qty`
/// must be a positive integer, `price` (if present) must be a positive
/// rational, and the identifying strings must be non-empty.
pub fn validate_order(order: &Order) -> Result<(), GateError> {
    if order.client_order_id.trim().is_empty() {
        return Err(GateError::InvalidOrderSchema {
            detail: "client_order_id must not be empty".to_string(),
        });
    }
    if order.symbol.trim().is_empty() {
        return Err(GateError::InvalidOrderSchema {
            detail: "symbol must not be empty".to_string(),
        });
    }
    if order.qty == 0 {
        return Err(GateError::InvalidOrderSchema {
            detail: "qty must be a positive integer".to_string(),
        });
    }
    if let Some(price) = order.price {
        if !price.is_finite() || price <= 0.0 {
            return Err(GateError::InvalidOrderSchema {
                detail: "price must be a positive finite rational when present".to_string(),
            });
        }
    }
    Ok(())
}

/// Render `price` as `price_repr`: exactly 8 decimal places, or the literal
/// `"null"` when absent.
pub fn price_repr(price: Option<f64>) -> String {
    match price {
        Some(p) => format!("{p:.8}"),
        None => "null".to_string(),
    }
}

/// Deterministic fingerprint binding a token to exact order content (spec §3
/// "Order digest", §6 "Canonical wire contracts"):
/// `SHA256(client_order_id | UPPER(symbol) | UPPER(side) | qty | price_repr)`.
pub fn compute_order_digest(order: &Order) -> String {
    let symbol_upper = order.symbol.to_uppercase();
    let side_upper = order.side.as_str();
    let qty = order.qty.to_string();
    let price = price_repr(order.price);

    sha256_hex_concat(&[
        order.client_order_id.as_bytes(),
        b"|",
        symbol_upper.as_bytes(),
        b"|",
        side_upper.as_bytes(),
        b"|",
        qty.as_bytes(),
        b"|",
        price.as_bytes(),
    ])
}
