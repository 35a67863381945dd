use tracing::error;
use ulid::Ulid;

use crate::engine::error::EngineError;
use crate::engine::{Engine, tax};
use crate::gateway::ChargeRequest;
use crate::model::{AuditAction, AuditEntry, Cents};
use crate::observability;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChargeOutcome {
    pub handle: String,
    pub client_secret: String,
    pub amounts: tax::Amounts,
}

impl Engine {
    /// Issue a payment charge for an order: load the subtotal, compute
    /// taxes and total, delegate to the gateway. Repeat invocations
    /// yield distinct handles; the idempotency key lets the processor
    /// dedupe retries of the same request.
    pub async fn create_charge(
        &self,
        caller: Option<&str>,
        order_id: Ulid,
        tip: Cents,
    ) -> Result<ChargeOutcome, EngineError> {
        let actor = caller.ok_or_else(|| {
            EngineError::Unauthenticated("caller identity required for charges".into())
        })?;
        let Some(order) = self.store.order(&order_id) else {
            return Err(EngineError::NotFound(format!("order {order_id}")));
        };
        let amounts = tax::compute(order.subtotal, tip)?;

        let request = ChargeRequest {
            amount: amounts.total,
            currency: self.config.currency.clone(),
            idempotency_key: format!("{order_id}:{}:{}", order.subtotal, tip),
            metadata: serde_json::json!({
                "order_id": order_id.to_string(),
                "subtotal": amounts.subtotal,
                "tps": amounts.tps,
                "tvq": amounts.tvq,
                "tip": amounts.tip,
            }),
        };
        let charge = self.gateway.create_charge(&request).await.map_err(|e| {
            error!(order_id = %order_id, "gateway charge failed: {e}");
            EngineError::Internal(format!("payment gateway: {e}"))
        })?;

        metrics::counter!(observability::CHARGES_TOTAL).increment(1);
        self.recorder
            .record(AuditEntry {
                actor_id: actor.to_string(),
                action: AuditAction::ChargeCreated,
                target: format!("orders/{order_id}"),
                metadata: serde_json::json!({
                    "amount": amounts.total,
                    "handle": charge.handle,
                }),
                at: Self::now_ms(),
            })
            .await;

        Ok(ChargeOutcome {
            handle: charge.handle,
            client_secret: charge.client_secret,
            amounts,
        })
    }
}
