//! PostgreSQL implementation of the storage boundary.
//!
//! # Atomicity Guarantees
//!
//! Invoice allocation, intent insert, status writes and the settlement cascade
//! each run inside one PostgreSQL transaction. Rows whose state is checked
//! before writing are locked with `FOR UPDATE` first.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Postgres, Transaction};
use uuid::Uuid;

use super::PaymentRepository;
use crate::db::DbPool;
use crate::error::AppError;
use crate::gateway::GatewayAuditLog;
use crate::models::billing::{Billing, BillingStudent, Student};
use crate::models::gateway_log::{GatewayLog, NewGatewayLog};
use crate::models::invoice::{InvoiceFormat, InvoiceScope, NewInvoiceFormat};
use crate::models::payment_method::PaymentMethod;
use crate::models::principal::Principal;
use crate::models::transaction::{
    ApplyOutcome, CascadeStatus, NewHistoryEntry, NewTransactionIntent, StatusUpdate,
    TransactionBilling, TransactionBillingDetail, TransactionBillingHistory, TransactionStatus,
    Transition, decide_transition,
};

const INVOICE_NUMBER_KEY: &str = "transaction_billings_school_invoice_number_key";
const ORDER_ID_KEY: &str = "transaction_billings_order_id_key";

pub struct PgRepository {
    pool: DbPool,
}

impl PgRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

/// Escape `LIKE` metacharacters so a prefix matches literally.
fn like_literal(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Classify unique violations on the transaction table.
fn map_insert_error(err: sqlx::Error, intent: &NewTransactionIntent, invoice_number: &str) -> AppError {
    if let sqlx::Error::Database(ref db) = err {
        if db.is_unique_violation() {
            match db.constraint() {
                Some(INVOICE_NUMBER_KEY) => {
                    return AppError::InvoiceNumberConflict(invoice_number.to_string());
                }
                Some(ORDER_ID_KEY) => {
                    return AppError::InvalidRequest(format!(
                        "orderId {} is already in use",
                        intent.order_id
                    ));
                }
                _ => {}
            }
        }
    }
    AppError::Database(err)
}

/// Seed the counter row from the newest issued invoice if needed, then
/// increment it under the row lock.
async fn next_sequence(
    tx: &mut Transaction<'_, Postgres>,
    scope: &InvoiceScope,
) -> Result<i64, AppError> {
    let existing: Option<(i64,)> = sqlx::query_as(
        r#"
        SELECT last_sequence FROM invoice_sequences
        WHERE school_id = $1 AND prefix = $2 AND period = $3 AND date_part = $4
        "#,
    )
    .bind(scope.school_id)
    .bind(&scope.prefix)
    .bind(scope.period.as_str())
    .bind(&scope.date_part)
    .fetch_optional(&mut **tx)
    .await?;

    if existing.is_none() {
        let (window_start, window_end) = match scope.window {
            Some((start, end)) => (Some(start), Some(end)),
            None => (None, None),
        };

        let last: Option<(String,)> = sqlx::query_as(
            r#"
            SELECT invoice_number
            FROM transaction_billings
            WHERE school_id = $1
              AND invoice_number LIKE $2 ESCAPE '\'
              AND ($3::timestamptz IS NULL OR created_at >= $3)
              AND ($4::timestamptz IS NULL OR created_at < $4)
            ORDER BY created_at DESC, invoice_number DESC
            LIMIT 1
            "#,
        )
        .bind(scope.school_id)
        .bind(format!("{}%", like_literal(&scope.stem())))
        .bind(window_start)
        .bind(window_end)
        .fetch_optional(&mut **tx)
        .await?;

        let seed = match last {
            Some((invoice_number,)) => scope.parse_sequence(&invoice_number)?,
            None => 0,
        };

        sqlx::query(
            r#"
            INSERT INTO invoice_sequences (school_id, prefix, period, date_part, last_sequence)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (school_id, prefix, period, date_part) DO NOTHING
            "#,
        )
        .bind(scope.school_id)
        .bind(&scope.prefix)
        .bind(scope.period.as_str())
        .bind(&scope.date_part)
        .bind(seed)
        .execute(&mut **tx)
        .await?;
    }

    // The UPDATE takes the row lock and holds it until commit
    let (sequence,): (i64,) = sqlx::query_as(
        r#"
        UPDATE invoice_sequences
        SET last_sequence = last_sequence + 1,
            updated_at = NOW()
        WHERE school_id = $1 AND prefix = $2 AND period = $3 AND date_part = $4
        RETURNING last_sequence
        "#,
    )
    .bind(scope.school_id)
    .bind(&scope.prefix)
    .bind(scope.period.as_str())
    .bind(&scope.date_part)
    .fetch_one(&mut **tx)
    .await?;

    Ok(sequence)
}

async fn insert_history(
    tx: &mut Transaction<'_, Postgres>,
    entry: &NewHistoryEntry,
) -> Result<(), AppError> {
    sqlx::query(
        r#"
        INSERT INTO transaction_billing_histories (
            transaction_billing_id,
            reference_number,
            order_id,
            invoice_number,
            transaction_status,
            is_anomaly,
            note
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        "#,
    )
    .bind(entry.transaction_billing_id)
    .bind(&entry.reference_number)
    .bind(&entry.order_id)
    .bind(&entry.invoice_number)
    .bind(&entry.transaction_status)
    .bind(entry.is_anomaly)
    .bind(&entry.note)
    .execute(&mut **tx)
    .await?;

    Ok(())
}

/// Return the transaction's still-pending lines to `unpaid`.
///
/// `create_intent` only claims unpaid lines, so a pending line is held by one
/// open attempt at a time and these are this attempt's own.
async fn release_billing_students(
    tx: &mut Transaction<'_, Postgres>,
    transaction: &TransactionBilling,
) -> Result<u64, AppError> {
    if transaction.billing_student_ids.0.is_empty() {
        return Ok(0);
    }

    let released = sqlx::query(
        r#"
        UPDATE billing_students
        SET payment_status = 'unpaid',
            updated_at = NOW()
        WHERE id = ANY($1)
          AND student_id = $2
          AND payment_status = 'pending'
        "#,
    )
    .bind(&transaction.billing_student_ids.0)
    .bind(transaction.student_id)
    .execute(&mut **tx)
    .await?
    .rows_affected();

    Ok(released)
}

#[async_trait]
impl GatewayAuditLog for PgRepository {
    async fn record_exchange(&self, entry: NewGatewayLog) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO gateway_logs (order_id, operation, request, response, http_status)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(&entry.order_id)
        .bind(entry.operation)
        .bind(&entry.request)
        .bind(&entry.response)
        .bind(entry.http_status)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl PaymentRepository for PgRepository {
    async fn ping(&self) -> Result<(), AppError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn find_principal(&self, token_hash: &str) -> Result<Option<Principal>, AppError> {
        let principal = sqlx::query_as::<_, Principal>(
            r#"
            SELECT user_id, role, school_id
            FROM api_tokens
            WHERE token_hash = $1 AND is_active = TRUE
            "#,
        )
        .bind(token_hash)
        .fetch_optional(&self.pool)
        .await?;

        Ok(principal)
    }

    async fn find_student(&self, student_id: Uuid) -> Result<Option<Student>, AppError> {
        let student = sqlx::query_as::<_, Student>(
            "SELECT id, school_id, name, deleted_at FROM students WHERE id = $1",
        )
        .bind(student_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(student)
    }

    async fn find_billing(&self, billing_id: Uuid) -> Result<Option<Billing>, AppError> {
        let billing = sqlx::query_as::<_, Billing>(
            r#"
            SELECT id, school_id, name, amount, is_donation, bank_account_number, created_at
            FROM billings
            WHERE id = $1
            "#,
        )
        .bind(billing_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(billing)
    }

    async fn find_billing_students(&self, ids: &[Uuid]) -> Result<Vec<BillingStudent>, AppError> {
        let rows = sqlx::query_as::<_, BillingStudent>(
            r#"
            SELECT id, billing_id, student_id, name, amount, due_date,
                   payment_status, payment_date, deleted_at, created_at
            FROM billing_students
            WHERE id = ANY($1)
            "#,
        )
        .bind(ids)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    async fn find_payment_method(&self, id: Uuid) -> Result<Option<PaymentMethod>, AppError> {
        let method = sqlx::query_as::<_, PaymentMethod>(
            r#"
            SELECT id, name, method_type, bank_code, flat_fee, percentage_fee, is_active
            FROM payment_methods
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(method)
    }

    async fn find_invoice_format(&self, school_id: Uuid) -> Result<Option<InvoiceFormat>, AppError> {
        let format = sqlx::query_as::<_, InvoiceFormat>(
            "SELECT * FROM invoice_formats WHERE school_id = $1",
        )
        .bind(school_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(format)
    }

    async fn upsert_invoice_format(&self, format: NewInvoiceFormat) -> Result<InvoiceFormat, AppError> {
        let saved = sqlx::query_as::<_, InvoiceFormat>(
            r#"
            INSERT INTO invoice_formats (school_id, prefix, format, generated_invoice_format)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (school_id) DO UPDATE
            SET prefix = EXCLUDED.prefix,
                format = EXCLUDED.format,
                generated_invoice_format = EXCLUDED.generated_invoice_format,
                updated_at = NOW()
            RETURNING *
            "#,
        )
        .bind(format.school_id)
        .bind(&format.prefix)
        .bind(format.format.as_str())
        .bind(&format.generated_invoice_format)
        .fetch_one(&self.pool)
        .await?;

        Ok(saved)
    }

    async fn find_transaction(&self, order_id: &str) -> Result<Option<TransactionBilling>, AppError> {
        let transaction = sqlx::query_as::<_, TransactionBilling>(
            "SELECT * FROM transaction_billings WHERE order_id = $1",
        )
        .bind(order_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(transaction)
    }

    async fn find_detail(
        &self,
        transaction_billing_id: Uuid,
    ) -> Result<Option<TransactionBillingDetail>, AppError> {
        let detail = sqlx::query_as::<_, TransactionBillingDetail>(
            "SELECT * FROM transaction_billing_details WHERE transaction_billing_id = $1",
        )
        .bind(transaction_billing_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(detail)
    }

    async fn list_history(
        &self,
        transaction_billing_id: Uuid,
    ) -> Result<Vec<TransactionBillingHistory>, AppError> {
        let history = sqlx::query_as::<_, TransactionBillingHistory>(
            r#"
            SELECT * FROM transaction_billing_histories
            WHERE transaction_billing_id = $1
            ORDER BY created_at ASC
            "#,
        )
        .bind(transaction_billing_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(history)
    }

    async fn list_gateway_logs(&self, order_id: &str) -> Result<Vec<GatewayLog>, AppError> {
        let logs = sqlx::query_as::<_, GatewayLog>(
            "SELECT * FROM gateway_logs WHERE order_id = $1 ORDER BY created_at ASC",
        )
        .bind(order_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(logs)
    }

    async fn create_intent(
        &self,
        scope: &InvoiceScope,
        intent: &NewTransactionIntent,
    ) -> Result<TransactionBilling, AppError> {
        let mut tx = self.pool.begin().await?;
        let ids = &intent.billing_student_ids.0;

        // Only unpaid lines can be claimed; a pending line belongs to another open attempt
        if !ids.is_empty() {
            let locked: Vec<(Uuid,)> = sqlx::query_as(
                r#"
                SELECT id FROM billing_students
                WHERE id = ANY($1)
                  AND student_id = $2
                  AND deleted_at IS NULL
                  AND payment_status = 'unpaid'
                FOR UPDATE
                "#,
            )
            .bind(ids)
            .bind(intent.student_id)
            .fetch_all(&mut *tx)
            .await?;

            if locked.len() != ids.len() {
                tx.rollback().await?;
                return Err(AppError::InvalidBillingSelection(
                    "one or more lines were paid, removed or claimed by another payment".to_string(),
                ));
            }
        }

        let sequence = next_sequence(&mut tx, scope).await?;
        let invoice_number = scope.render(sequence);

        // Savepoint so a taken number can be burned instead of rolled back
        let mut savepoint = sqlx::Connection::begin(&mut *tx).await?;
        let inserted = sqlx::query_as::<_, TransactionBilling>(
            r#"
            INSERT INTO transaction_billings (
                school_id,
                student_id,
                billing_id,
                order_id,
                invoice_number,
                total_amount,
                transaction_status,
                billing_student_ids,
                is_donation,
                expiry_time,
                cascade_status
            )
            VALUES ($1, $2, $3, $4, $5, $6, 'initiating', $7, $8, $9, 'not_required')
            RETURNING *
            "#,
        )
        .bind(scope.school_id)
        .bind(intent.student_id)
        .bind(intent.billing_id)
        .bind(&intent.order_id)
        .bind(&invoice_number)
        .bind(intent.total_amount)
        .bind(intent.billing_student_ids.to_column())
        .bind(intent.is_donation)
        .bind(intent.expiry_time)
        .fetch_one(&mut *savepoint)
        .await;

        let transaction = match inserted {
            Ok(transaction) => {
                savepoint.commit().await?;
                transaction
            }
            Err(e) => {
                savepoint.rollback().await?;
                let err = map_insert_error(e, intent, &invoice_number);
                if matches!(err, AppError::InvoiceNumberConflict(_)) {
                    // Keep the counter bump so the next allocation moves past it
                    tx.commit().await?;
                } else {
                    tx.rollback().await?;
                }
                return Err(err);
            }
        };

        sqlx::query(
            r#"
            INSERT INTO transaction_billing_details (
                transaction_billing_id,
                payment_method_id,
                payment_method_type,
                bank_code,
                gross_amount,
                discount,
                admin_fee,
                change_amount,
                is_donation
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(transaction.id)
        .bind(intent.payment_method_id)
        .bind(intent.payment_method_type.as_str())
        .bind(&intent.bank_code)
        .bind(intent.gross_amount)
        .bind(intent.discount)
        .bind(intent.admin_fee)
        .bind(intent.change_amount)
        .bind(intent.is_donation)
        .execute(&mut *tx)
        .await?;

        insert_history(
            &mut tx,
            &NewHistoryEntry {
                transaction_billing_id: transaction.id,
                reference_number: None,
                order_id: transaction.order_id.clone(),
                invoice_number: transaction.invoice_number.clone(),
                transaction_status: TransactionStatus::Initiating.as_str().to_string(),
                is_anomaly: false,
                note: None,
            },
        )
        .await?;

        if !ids.is_empty() {
            sqlx::query(
                r#"
                UPDATE billing_students
                SET payment_status = 'pending',
                    updated_at = NOW()
                WHERE id = ANY($1)
                "#,
            )
            .bind(ids)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        Ok(transaction)
    }

    async fn finalize_intent(
        &self,
        order_id: &str,
        token: &str,
        redirect_url: &str,
    ) -> Result<TransactionBilling, AppError> {
        let mut tx = self.pool.begin().await?;

        let current = sqlx::query_as::<_, TransactionBilling>(
            "SELECT * FROM transaction_billings WHERE order_id = $1 FOR UPDATE",
        )
        .bind(order_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| AppError::UnknownTransaction(order_id.to_string()))?;

        // A webhook may have already moved the row past initiating
        if current.transaction_status != TransactionStatus::Initiating {
            let updated = sqlx::query_as::<_, TransactionBilling>(
                r#"
                UPDATE transaction_billings
                SET snap_token = $2,
                    redirect_url = $3,
                    updated_at = NOW()
                WHERE id = $1
                RETURNING *
                "#,
            )
            .bind(current.id)
            .bind(token)
            .bind(redirect_url)
            .fetch_one(&mut *tx)
            .await?;
            tx.commit().await?;
            return Ok(updated);
        }

        let updated = sqlx::query_as::<_, TransactionBilling>(
            r#"
            UPDATE transaction_billings
            SET transaction_status = 'pending',
                snap_token = $2,
                redirect_url = $3,
                updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(current.id)
        .bind(token)
        .bind(redirect_url)
        .fetch_one(&mut *tx)
        .await?;

        insert_history(
            &mut tx,
            &NewHistoryEntry {
                transaction_billing_id: updated.id,
                reference_number: None,
                order_id: updated.order_id.clone(),
                invoice_number: updated.invoice_number.clone(),
                transaction_status: TransactionStatus::Pending.as_str().to_string(),
                is_anomaly: false,
                note: Some("charge opened".to_string()),
            },
        )
        .await?;

        tx.commit().await?;

        Ok(updated)
    }

    async fn fail_intent(&self, order_id: &str, reason: &str) -> Result<TransactionBilling, AppError> {
        let mut tx = self.pool.begin().await?;

        let current = sqlx::query_as::<_, TransactionBilling>(
            "SELECT * FROM transaction_billings WHERE order_id = $1 FOR UPDATE",
        )
        .bind(order_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| AppError::UnknownTransaction(order_id.to_string()))?;

        if current.transaction_status != TransactionStatus::Initiating {
            tx.rollback().await?;
            return Ok(current);
        }

        let updated = sqlx::query_as::<_, TransactionBilling>(
            r#"
            UPDATE transaction_billings
            SET transaction_status = 'failed',
                updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(current.id)
        .fetch_one(&mut *tx)
        .await?;

        release_billing_students(&mut tx, &updated).await?;

        insert_history(
            &mut tx,
            &NewHistoryEntry {
                transaction_billing_id: updated.id,
                reference_number: None,
                order_id: updated.order_id.clone(),
                invoice_number: updated.invoice_number.clone(),
                transaction_status: TransactionStatus::Failed.as_str().to_string(),
                is_anomaly: false,
                note: Some(reason.to_string()),
            },
        )
        .await?;

        tx.commit().await?;

        Ok(updated)
    }

    async fn apply_status(&self, update: &StatusUpdate) -> Result<ApplyOutcome, AppError> {
        let mut tx = self.pool.begin().await?;

        // Lock held across the terminal-state check and the write
        let current = sqlx::query_as::<_, TransactionBilling>(
            "SELECT * FROM transaction_billings WHERE order_id = $1 FOR UPDATE",
        )
        .bind(&update.order_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| AppError::UnknownTransaction(update.order_id.clone()))?;

        let history = |status: &str, is_anomaly: bool, note: Option<String>| NewHistoryEntry {
            transaction_billing_id: current.id,
            reference_number: update.reference_number.clone(),
            order_id: current.order_id.clone(),
            invoice_number: current.invoice_number.clone(),
            transaction_status: status.to_string(),
            is_anomaly,
            note,
        };

        match decide_transition(current.transaction_status, update.status) {
            Transition::Replay => {
                tx.rollback().await?;
                Ok(ApplyOutcome::Replayed(current))
            }
            Transition::Anomaly => {
                let note = format!(
                    "{} reported {} while stored status is {}",
                    update.source.as_str(),
                    update.gateway_status,
                    current.transaction_status
                );
                insert_history(&mut tx, &history(&update.gateway_status, true, Some(note))).await?;
                tx.commit().await?;
                Ok(ApplyOutcome::Anomaly(current))
            }
            Transition::Refresh => {
                let refreshed = sqlx::query_as::<_, TransactionBilling>(
                    r#"
                    UPDATE transaction_billings
                    SET account_number = COALESCE($2, account_number),
                        updated_at = NOW()
                    WHERE id = $1
                    RETURNING *
                    "#,
                )
                .bind(current.id)
                .bind(&update.va_number)
                .fetch_one(&mut *tx)
                .await?;

                sqlx::query(
                    r#"
                    UPDATE transaction_billing_details
                    SET payment_type = COALESCE($2, payment_type),
                        va_number = COALESCE($3, va_number),
                        biller_code = COALESCE($4, biller_code),
                        bill_key = COALESCE($5, bill_key)
                    WHERE transaction_billing_id = $1
                    "#,
                )
                .bind(current.id)
                .bind(&update.payment_type)
                .bind(&update.va_number)
                .bind(&update.biller_code)
                .bind(&update.bill_key)
                .execute(&mut *tx)
                .await?;

                tx.commit().await?;
                Ok(ApplyOutcome::Refreshed(refreshed))
            }
            Transition::Apply(status) => {
                let cascade = if status == TransactionStatus::Settled
                    && !current.is_donation
                    && !current.billing_student_ids.0.is_empty()
                {
                    CascadeStatus::Pending
                } else {
                    CascadeStatus::NotRequired
                };

                let applied = sqlx::query_as::<_, TransactionBilling>(
                    r#"
                    UPDATE transaction_billings
                    SET transaction_status = $2,
                        cascade_status = $3,
                        account_number = COALESCE($4, account_number),
                        updated_at = NOW()
                    WHERE id = $1
                    RETURNING *
                    "#,
                )
                .bind(current.id)
                .bind(status.as_str())
                .bind(cascade.as_str())
                .bind(&update.va_number)
                .fetch_one(&mut *tx)
                .await?;

                sqlx::query(
                    r#"
                    UPDATE transaction_billing_details
                    SET payment_type = COALESCE($2, payment_type),
                        va_number = COALESCE($3, va_number),
                        biller_code = COALESCE($4, biller_code),
                        bill_key = COALESCE($5, bill_key),
                        settlement_time = COALESCE($6, settlement_time)
                    WHERE transaction_billing_id = $1
                    "#,
                )
                .bind(current.id)
                .bind(&update.payment_type)
                .bind(&update.va_number)
                .bind(&update.biller_code)
                .bind(&update.bill_key)
                .bind(update.settlement_time)
                .execute(&mut *tx)
                .await?;

                if status.is_terminal() && status != TransactionStatus::Settled {
                    release_billing_students(&mut tx, &applied).await?;
                }

                insert_history(
                    &mut tx,
                    &history(status.as_str(), false, Some(update.source.as_str().to_string())),
                )
                .await?;

                tx.commit().await?;
                Ok(ApplyOutcome::Applied {
                    transaction: applied,
                    previous: current.transaction_status,
                })
            }
        }
    }

    async fn settle_billing_students(
        &self,
        transaction: &TransactionBilling,
        paid_at: DateTime<Utc>,
    ) -> Result<(), AppError> {
        let ids = &transaction.billing_student_ids.0;
        let mut tx = self.pool.begin().await?;

        let marked = sqlx::query(
            r#"
            UPDATE billing_students
            SET payment_status = 'paid',
                payment_date = $3,
                updated_at = NOW()
            WHERE id = ANY($1)
              AND student_id = $2
              AND deleted_at IS NULL
              AND payment_status <> 'paid'
            "#,
        )
        .bind(ids)
        .bind(transaction.student_id)
        .bind(paid_at)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if marked != ids.len() as u64 {
            tx.rollback().await?;
            return Err(AppError::CascadeIncomplete(format!(
                "{} of {} lines could be marked paid for {}",
                marked,
                ids.len(),
                transaction.order_id
            )));
        }

        sqlx::query(
            r#"
            UPDATE transaction_billings
            SET cascade_status = 'done',
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(transaction.id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(())
    }

    async fn flag_cascade_failure(
        &self,
        transaction: &TransactionBilling,
        reason: &str,
    ) -> Result<(), AppError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            UPDATE transaction_billings
            SET cascade_status = 'failed',
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(transaction.id)
        .execute(&mut *tx)
        .await?;

        insert_history(
            &mut tx,
            &NewHistoryEntry {
                transaction_billing_id: transaction.id,
                reference_number: None,
                order_id: transaction.order_id.clone(),
                invoice_number: transaction.invoice_number.clone(),
                transaction_status: transaction.transaction_status.as_str().to_string(),
                is_anomaly: true,
                note: Some(format!("settlement cascade failed: {}", reason)),
            },
        )
        .await?;

        tx.commit().await?;

        Ok(())
    }

    async fn append_history(&self, entry: &NewHistoryEntry) -> Result<(), AppError> {
        let mut tx = self.pool.begin().await?;
        insert_history(&mut tx, entry).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn list_stale_transactions(
        &self,
        created_before: DateTime<Utc>,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<TransactionBilling>, AppError> {
        let rows = sqlx::query_as::<_, TransactionBilling>(
            r#"
            SELECT * FROM transaction_billings
            WHERE (transaction_status = 'initiating' AND created_at < $1)
               OR (transaction_status = 'pending' AND expiry_time IS NOT NULL AND expiry_time < $2)
            ORDER BY created_at ASC
            LIMIT $3
            "#,
        )
        .bind(created_before)
        .bind(now)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    async fn list_unfinished_cascades(&self, limit: i64) -> Result<Vec<TransactionBilling>, AppError> {
        let rows = sqlx::query_as::<_, TransactionBilling>(
            r#"
            SELECT * FROM transaction_billings
            WHERE transaction_status = 'settled'
              AND cascade_status IN ('pending', 'failed')
            ORDER BY updated_at ASC
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }
}
