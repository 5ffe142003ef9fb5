//! Admin fee calculation.
//!
//! Pure functions: the fee depends only on the gross amount and the payment
//! method record. Amounts are whole units of IDR.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::Serialize;
use std::str::FromStr;

use crate::error::AppError;
use crate::models::payment_method::{PaymentMethod, PaymentMethodKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FeeBreakdown {
    pub gross_amount: i64,
    pub admin_fee: i64,
    pub total_amount: i64,
}

/// Compute the admin fee and charged total for `gross_amount`.
///
/// # Rules
///
/// - Virtual account: the flat fee
/// - Credit card: `round(gross * percentage / 100) + flat fee`
/// - QRIS: `round(gross * percentage / 100)`
///
/// Rounding is half away from zero. A percentage that is missing where
/// required, unparseable or negative is a configuration error; it is never
/// treated as zero.
///
/// # Errors
///
/// - `UnsupportedPaymentMethod`: unknown type or inactive method
/// - `InvalidFeeConfiguration`: bad percentage, negative flat fee, overflow
pub fn calculate(method: &PaymentMethod, gross_amount: i64) -> Result<FeeBreakdown, AppError> {
    if !method.is_active {
        return Err(AppError::UnsupportedPaymentMethod(format!(
            "{} is not active",
            method.name
        )));
    }

    let kind = method
        .kind()
        .map_err(|e| AppError::UnsupportedPaymentMethod(e.to_string()))?;

    if gross_amount <= 0 {
        return Err(AppError::InvalidRequest(
            "Amount must be positive".to_string(),
        ));
    }
    if method.flat_fee < 0 {
        return Err(AppError::InvalidFeeConfiguration(format!(
            "negative flat fee on {}",
            method.name
        )));
    }

    let admin_fee = match kind {
        PaymentMethodKind::VirtualAccount => method.flat_fee,
        PaymentMethodKind::CreditCard => {
            let percentage = percentage_of(method, gross_amount)?;
            percentage.checked_add(method.flat_fee).ok_or_else(|| overflow(method))?
        }
        PaymentMethodKind::Qris => percentage_of(method, gross_amount)?,
    };

    let total_amount = gross_amount
        .checked_add(admin_fee)
        .ok_or_else(|| overflow(method))?;

    Ok(FeeBreakdown {
        gross_amount,
        admin_fee,
        total_amount,
    })
}

fn percentage_of(method: &PaymentMethod, gross_amount: i64) -> Result<i64, AppError> {
    let rate = parse_percentage(method)?;

    Decimal::from(gross_amount)
        .checked_mul(rate)
        .and_then(|fee| fee.checked_div(Decimal::ONE_HUNDRED))
        .map(|fee| fee.round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero))
        .and_then(|fee| fee.to_i64())
        .ok_or_else(|| overflow(method))
}

fn parse_percentage(method: &PaymentMethod) -> Result<Decimal, AppError> {
    let raw = method.percentage_fee.as_deref().map(str::trim).unwrap_or("");
    if raw.is_empty() {
        return Err(AppError::InvalidFeeConfiguration(format!(
            "{} has no percentage fee",
            method.name
        )));
    }

    let rate = Decimal::from_str(raw).map_err(|e| {
        AppError::InvalidFeeConfiguration(format!(
            "percentage fee {:?} on {}: {}",
            raw, method.name, e
        ))
    })?;

    if rate.is_sign_negative() {
        return Err(AppError::InvalidFeeConfiguration(format!(
            "negative percentage fee on {}",
            method.name
        )));
    }

    Ok(rate)
}

fn overflow(method: &PaymentMethod) -> AppError {
    AppError::InvalidFeeConfiguration(format!("fee on {} overflows", method.name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn method(method_type: &str, flat_fee: i64, percentage_fee: Option<&str>) -> PaymentMethod {
        PaymentMethod {
            id: Uuid::new_v4(),
            name: format!("{} test", method_type),
            method_type: method_type.to_string(),
            bank_code: Some("bca".to_string()),
            flat_fee,
            percentage_fee: percentage_fee.map(str::to_string),
            is_active: true,
        }
    }

    #[test]
    fn virtual_account_charges_flat_fee() {
        let fee = calculate(&method("virtual_account", 4000, None), 80_000).unwrap();
        assert_eq!(fee.admin_fee, 4000);
        assert_eq!(fee.total_amount, 84_000);
    }

    #[test]
    fn credit_card_adds_percentage_and_flat_fee() {
        // 100,000 * 2.9% = 2,900 + 2,000
        let fee = calculate(&method("credit_card", 2000, Some("2.9")), 100_000).unwrap();
        assert_eq!(fee.admin_fee, 4900);
        assert_eq!(fee.total_amount, 104_900);
    }

    #[test]
    fn qris_ignores_flat_fee() {
        let fee = calculate(&method("qris", 5000, Some("0.7")), 80_000).unwrap();
        assert_eq!(fee.admin_fee, 560);
    }

    #[test]
    fn rounding_is_half_away_from_zero() {
        // 50 * 0.7% = 0.35 -> 0, 500 * 0.7% = 3.5 -> 4
        assert_eq!(calculate(&method("qris", 0, Some("0.7")), 50).unwrap().admin_fee, 0);
        assert_eq!(calculate(&method("qris", 0, Some("0.7")), 500).unwrap().admin_fee, 4);
        // 12,345 * 2.5% = 308.625 -> 309
        assert_eq!(
            calculate(&method("credit_card", 0, Some("2.5")), 12_345).unwrap().admin_fee,
            309
        );
    }

    #[test]
    fn unparseable_percentage_is_a_configuration_error() {
        for bad in [Some("abc"), Some(""), Some("-1"), None] {
            let err = calculate(&method("credit_card", 0, bad), 10_000).unwrap_err();
            assert!(matches!(err, AppError::InvalidFeeConfiguration(_)), "{:?}", bad);
        }
    }

    #[test]
    fn unknown_or_inactive_methods_are_unsupported() {
        assert!(matches!(
            calculate(&method("cash", 0, None), 10_000),
            Err(AppError::UnsupportedPaymentMethod(_))
        ));

        let mut inactive = method("virtual_account", 4000, None);
        inactive.is_active = false;
        assert!(matches!(
            calculate(&inactive, 10_000),
            Err(AppError::UnsupportedPaymentMethod(_))
        ));
    }

    #[test]
    fn overflow_is_reported_not_wrapped() {
        let err = calculate(&method("virtual_account", i64::MAX, None), 1).unwrap_err();
        assert!(matches!(err, AppError::InvalidFeeConfiguration(_)));
    }
}
