use crate::engine::error::EngineError;
use crate::model::Cents;

// Québec sales tax rates as exact fractions: TPS 5/100, TVQ 9975/100000.
const TPS_NUM: i64 = 5;
const TPS_DEN: i64 = 100;
const TVQ_NUM: i64 = 9_975;
const TVQ_DEN: i64 = 100_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Amounts {
    pub subtotal: Cents,
    pub tps: Cents,
    pub tvq: Cents,
    pub tip: Cents,
    pub total: Cents,
}

/// Round-half-up of `value * num / den` in pure integer arithmetic.
/// Exactly 0.5 cent rounds away from zero for the non-negative inputs
/// this module accepts.
fn tax_part(value: Cents, num: i64, den: i64) -> Cents {
    (value * num + den / 2) / den
}

/// Both taxes apply to the subtotal independently; tax never applies to
/// the tip and never compounds. Each tax is rounded to the cent before
/// summing.
pub fn compute(subtotal: Cents, tip: Cents) -> Result<Amounts, EngineError> {
    if subtotal < 0 {
        return Err(EngineError::InvalidArgument(format!(
            "subtotal must be non-negative, got {subtotal}"
        )));
    }
    if tip < 0 {
        return Err(EngineError::InvalidArgument(format!(
            "tip must be non-negative, got {tip}"
        )));
    }
    let tps = tax_part(subtotal, TPS_NUM, TPS_DEN);
    let tvq = tax_part(subtotal, TVQ_NUM, TVQ_DEN);
    Ok(Amounts {
        subtotal,
        tps,
        tvq,
        tip,
        total: subtotal + tps + tvq + tip,
    })
}
