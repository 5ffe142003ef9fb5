//! Invoice numbering configuration and scope arithmetic.
//!
//! An invoice number is `prefix + date_part + sequence`. The date part and the
//! window of prior invoices that share a sequence both derive from the
//! school's configured period granularity.

use chrono::{DateTime, Datelike, FixedOffset, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::UnknownVariant;

/// Period granularity of a school's invoice numbering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoicePeriod {
    /// No date part; one sequence for the lifetime of the prefix
    Unscoped,
    /// `yy`
    Yearly,
    /// `mmyy`
    Monthly,
    /// `ddmmyy`
    Daily,
}

impl InvoicePeriod {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvoicePeriod::Unscoped => "unscoped",
            InvoicePeriod::Yearly => "yearly",
            InvoicePeriod::Monthly => "monthly",
            InvoicePeriod::Daily => "daily",
        }
    }

    /// Date fragment embedded in invoice numbers issued at `now`.
    pub fn date_part(&self, now: &DateTime<FixedOffset>) -> String {
        match self {
            InvoicePeriod::Unscoped => String::new(),
            InvoicePeriod::Yearly => now.format("%y").to_string(),
            InvoicePeriod::Monthly => now.format("%m%y").to_string(),
            InvoicePeriod::Daily => now.format("%d%m%y").to_string(),
        }
    }

    /// Calendar window containing `now`, as UTC instants `[start, end)`.
    ///
    /// Returns `Some(None)` for unscoped numbering and `None` only if the
    /// calendar arithmetic falls outside chrono's supported range.
    pub fn window(&self, now: &DateTime<FixedOffset>) -> Option<Option<(DateTime<Utc>, DateTime<Utc>)>> {
        let today = now.date_naive();
        let (start, end) = match self {
            InvoicePeriod::Unscoped => return Some(None),
            InvoicePeriod::Daily => (today, today.succ_opt()?),
            InvoicePeriod::Monthly => {
                let start = NaiveDate::from_ymd_opt(today.year(), today.month(), 1)?;
                let end = if today.month() == 12 {
                    NaiveDate::from_ymd_opt(today.year() + 1, 1, 1)?
                } else {
                    NaiveDate::from_ymd_opt(today.year(), today.month() + 1, 1)?
                };
                (start, end)
            }
            InvoicePeriod::Yearly => (
                NaiveDate::from_ymd_opt(today.year(), 1, 1)?,
                NaiveDate::from_ymd_opt(today.year() + 1, 1, 1)?,
            ),
        };

        let offset = now.offset();
        let to_utc = |date: NaiveDate| -> Option<DateTime<Utc>> {
            date.and_hms_opt(0, 0, 0)?
                .and_local_timezone(*offset)
                .single()
                .map(|local| local.with_timezone(&Utc))
        };

        Some(Some((to_utc(start)?, to_utc(end)?)))
    }
}

impl TryFrom<String> for InvoicePeriod {
    type Error = UnknownVariant;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "unscoped" => Ok(InvoicePeriod::Unscoped),
            "yearly" => Ok(InvoicePeriod::Yearly),
            "monthly" => Ok(InvoicePeriod::Monthly),
            "daily" => Ok(InvoicePeriod::Daily),
            _ => Err(UnknownVariant::new("invoice_format", value)),
        }
    }
}

/// Represents a row of the `invoice_formats` table (one per school).
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct InvoiceFormat {
    pub id: Uuid,
    pub school_id: Uuid,
    pub prefix: String,
    #[sqlx(try_from = "String")]
    pub format: InvoicePeriod,

    /// Example rendering of the first invoice number under this format
    pub generated_invoice_format: String,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Request body for `PUT /api/v1/schools/{school_id}/invoice-format`.
///
/// ```json
/// { "prefix": "INV", "format": "monthly" }
/// ```
#[derive(Debug, Deserialize)]
pub struct InvoiceFormatRequest {
    pub prefix: String,
    pub format: InvoicePeriod,
}

/// Values written by the create-or-replace operation.
#[derive(Debug, Clone)]
pub struct NewInvoiceFormat {
    pub school_id: Uuid,
    pub prefix: String,
    pub format: InvoicePeriod,
    pub generated_invoice_format: String,
}

/// The last issued invoice number does not end in a parseable sequence.
#[derive(Debug, thiserror::Error)]
#[error("invoice number {0:?} does not end in a valid sequence")]
pub struct MalformedSequence(pub String);

/// Everything needed to allocate one invoice number for a school at one instant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvoiceScope {
    pub school_id: Uuid,
    pub prefix: String,
    pub period: InvoicePeriod,
    pub date_part: String,

    /// Creation-time window of prior invoices sharing this sequence
    pub window: Option<(DateTime<Utc>, DateTime<Utc>)>,
}

impl InvoiceScope {
    pub fn new(
        school_id: Uuid,
        prefix: &str,
        period: InvoicePeriod,
        now: &DateTime<FixedOffset>,
    ) -> Option<Self> {
        Some(Self {
            school_id,
            prefix: prefix.to_string(),
            period,
            date_part: period.date_part(now),
            window: period.window(now)?,
        })
    }

    /// `prefix + date_part`, the fixed head of every number in this scope.
    pub fn stem(&self) -> String {
        format!("{}{}", self.prefix, self.date_part)
    }

    pub fn render(&self, sequence: i64) -> String {
        match self.period {
            InvoicePeriod::Unscoped => format!("{}{}", self.stem(), sequence),
            _ => format!("{}{:05}", self.stem(), sequence),
        }
    }

    /// Extract the sequence from a previously issued number in this scope.
    pub fn parse_sequence(&self, invoice_number: &str) -> Result<i64, MalformedSequence> {
        let malformed = || MalformedSequence(invoice_number.to_string());

        let suffix = invoice_number
            .strip_prefix(self.stem().as_str())
            .ok_or_else(malformed)?;
        if suffix.is_empty() || !suffix.bytes().all(|b| b.is_ascii_digit()) {
            return Err(malformed());
        }

        suffix.parse::<i64>().map_err(|_| malformed())
    }

    /// Whether an invoice created at `created_at` shares this scope's sequence.
    pub fn contains(&self, created_at: DateTime<Utc>) -> bool {
        match self.window {
            None => true,
            Some((start, end)) => created_at >= start && created_at < end,
        }
    }
}
