use std::fmt;

use async_trait::async_trait;
use tracing::info;
use ulid::Ulid;

use crate::model::Cents;

/// What the engine hands the payment processor. The amount is the full
/// total (subtotal + taxes + tip); the tax breakdown rides along as
/// metadata for reconciliation.
#[derive(Debug, Clone, PartialEq)]
pub struct ChargeRequest {
    pub amount: Cents,
    pub currency: String,
    /// Deterministic per (order, subtotal, tip) so a real processor can
    /// dedupe retried requests.
    pub idempotency_key: String,
    pub metadata: serde_json::Value,
}

/// Opaque processor references returned to the caller. The client
/// completes payment against `client_secret` out of band.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChargeHandle {
    pub handle: String,
    pub client_secret: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    Declined(String),
    Unavailable(String),
}

impl fmt::Display for GatewayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GatewayError::Declined(msg) => write!(f, "charge declined: {msg}"),
            GatewayError::Unavailable(msg) => write!(f, "gateway unavailable: {msg}"),
        }
    }
}

impl std::error::Error for GatewayError {}

/// Boundary to the payment processor. Each invocation yields a distinct
/// handle; dedupe is the processor's job via the idempotency key.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_charge(&self, request: &ChargeRequest) -> Result<ChargeHandle, GatewayError>;
}

/// Development stand-in: fabricates handles and logs the request.
/// Swap in a real processor client here for production.
pub struct DevGateway;

#[async_trait]
impl PaymentGateway for DevGateway {
    async fn create_charge(&self, request: &ChargeRequest) -> Result<ChargeHandle, GatewayError> {
        let handle = format!("ch_{}", Ulid::new());
        info!(
            amount = request.amount,
            currency = %request.currency,
            idempotency_key = %request.idempotency_key,
            %handle,
            "dev gateway charge"
        );
        Ok(ChargeHandle {
            client_secret: format!("{handle}_secret_{}", Ulid::new()),
            handle,
        })
    }
}
