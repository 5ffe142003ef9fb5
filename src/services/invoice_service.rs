//! Invoice numbering: per-school format administration and scope resolution.
//!
//! The sequence itself is allocated by the repository, inside the same local
//! transaction that inserts the payment attempt.

use chrono::{DateTime, FixedOffset, Utc};
use uuid::Uuid;

use crate::error::AppError;
use crate::models::invoice::{
    InvoiceFormat, InvoiceFormatRequest, InvoiceScope, NewInvoiceFormat,
};
use crate::repository::PaymentRepository;

const MAX_PREFIX_LEN: usize = 20;

/// Resolve the numbering scope for a school at `now`, read in `offset`.
///
/// # Errors
///
/// - `InvoiceFormatNotConfigured`: the school has no format row
pub async fn resolve_scope(
    repo: &dyn PaymentRepository,
    school_id: Uuid,
    now: DateTime<Utc>,
    offset: FixedOffset,
) -> Result<InvoiceScope, AppError> {
    let format = repo
        .find_invoice_format(school_id)
        .await?
        .ok_or(AppError::InvoiceFormatNotConfigured)?;

    let local = now.with_timezone(&offset);
    InvoiceScope::new(school_id, &format.prefix, format.format, &local)
        .ok_or_else(|| AppError::Internal(format!("calendar window out of range at {}", local)))
}

/// Create or replace a school's invoice format.
///
/// `generated_invoice_format` stores the first number the format would issue
/// today, as a preview for administrators.
pub async fn save_format(
    repo: &dyn PaymentRepository,
    school_id: Uuid,
    request: InvoiceFormatRequest,
    now: DateTime<Utc>,
    offset: FixedOffset,
) -> Result<InvoiceFormat, AppError> {
    let prefix = request.prefix.trim().to_string();
    validate_prefix(&prefix)?;

    let local = now.with_timezone(&offset);
    let preview = InvoiceScope::new(school_id, &prefix, request.format, &local)
        .ok_or_else(|| AppError::Internal(format!("calendar window out of range at {}", local)))?;

    let saved = repo
        .upsert_invoice_format(NewInvoiceFormat {
            school_id,
            prefix,
            format: request.format,
            generated_invoice_format: preview.render(1),
        })
        .await?;

    tracing::info!(
        school_id = %school_id,
        prefix = %saved.prefix,
        format = saved.format.as_str(),
        "invoice format saved"
    );

    Ok(saved)
}

pub async fn get_format(
    repo: &dyn PaymentRepository,
    school_id: Uuid,
) -> Result<InvoiceFormat, AppError> {
    repo.find_invoice_format(school_id)
        .await?
        .ok_or(AppError::InvoiceFormatNotConfigured)
}

/// Prefixes are matched with `LIKE` and echoed to payers; keep them plain.
fn validate_prefix(prefix: &str) -> Result<(), AppError> {
    if prefix.is_empty() || prefix.len() > MAX_PREFIX_LEN {
        return Err(AppError::InvalidRequest(format!(
            "prefix must be 1 to {} characters",
            MAX_PREFIX_LEN
        )));
    }

    if !prefix
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '/')
    {
        return Err(AppError::InvalidRequest(
            "prefix may only contain letters, digits, '-' and '/'".to_string(),
        ));
    }

    // A trailing digit would merge into the date part or sequence
    if prefix.ends_with(|c: char| c.is_ascii_digit()) {
        return Err(AppError::InvalidRequest(
            "prefix must not end with a digit".to_string(),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefix_rules() {
        assert!(validate_prefix("INV").is_ok());
        assert!(validate_prefix("SCH-01/INV").is_ok());
        assert!(validate_prefix("").is_err());
        assert!(validate_prefix("INV%").is_err());
        assert!(validate_prefix("INV_").is_err());
        assert!(validate_prefix("INV2").is_err());
        assert!(validate_prefix(&"A".repeat(21)).is_err());
    }
}
