//! Shared fixtures: an in-memory repository, a scripted gateway and seeding
//! helpers for a school with one parent and two unpaid fee lines.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, NaiveDate, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use school_payment_server::app::{AppState, EngineSettings};
use school_payment_server::error::AppError;
use school_payment_server::gateway::signature::{Sha512Signature, SignatureFields, SignatureVerifier};
use school_payment_server::gateway::{
    ChargeRequest, ChargeResponse, GatewayAuditLog, GatewayError, PaymentGateway, RefundReceipt,
};
use school_payment_server::middleware::auth::hash_token;
use school_payment_server::models::billing::{Billing, BillingStudent, PaymentStatus, Student};
use school_payment_server::models::gateway_log::{GatewayLog, NewGatewayLog};
use school_payment_server::models::invoice::{
    InvoiceFormat, InvoicePeriod, InvoiceScope, NewInvoiceFormat,
};
use school_payment_server::models::payment_method::PaymentMethod;
use school_payment_server::models::principal::{Principal, Role};
use school_payment_server::models::transaction::{
    ApplyOutcome, CascadeStatus, NewHistoryEntry, NewTransactionIntent, StatusUpdate,
    TransactionBilling, TransactionBillingDetail, TransactionBillingHistory, TransactionStatus,
    Transition, UpdateSource, decide_transition,
};
use school_payment_server::repository::PaymentRepository;
use school_payment_server::services::notification_service::{
    Notifier, NotifyError, SettlementNotice,
};

pub const SERVER_KEY: &str = "SB-Mid-server-test-key";
pub const PARENT_TOKEN: &str = "parent-token";
pub const ADMIN_TOKEN: &str = "admin-token";
pub const OPERATOR_TOKEN: &str = "operator-token";

type SequenceKey = (Uuid, String, String, String);

#[derive(Default)]
pub struct Store {
    pub principals: HashMap<String, Principal>,
    pub students: HashMap<Uuid, Student>,
    pub billings: HashMap<Uuid, Billing>,
    pub billing_students: HashMap<Uuid, BillingStudent>,
    pub methods: HashMap<Uuid, PaymentMethod>,
    pub formats: HashMap<Uuid, InvoiceFormat>,
    pub sequences: HashMap<SequenceKey, i64>,
    pub transactions: Vec<TransactionBilling>,
    pub details: Vec<TransactionBillingDetail>,
    pub history: Vec<TransactionBillingHistory>,
    pub gateway_logs: Vec<GatewayLog>,
}

impl Store {
    fn transaction_mut(&mut self, order_id: &str) -> Option<&mut TransactionBilling> {
        self.transactions.iter_mut().find(|t| t.order_id == order_id)
    }

    fn detail_mut(&mut self, transaction_billing_id: Uuid) -> Option<&mut TransactionBillingDetail> {
        self.details
            .iter_mut()
            .find(|d| d.transaction_billing_id == transaction_billing_id)
    }

    fn push_history(&mut self, entry: &NewHistoryEntry) {
        self.history.push(TransactionBillingHistory {
            id: Uuid::new_v4(),
            transaction_billing_id: entry.transaction_billing_id,
            reference_number: entry.reference_number.clone(),
            order_id: entry.order_id.clone(),
            invoice_number: entry.invoice_number.clone(),
            transaction_status: entry.transaction_status.clone(),
            is_anomaly: entry.is_anomaly,
            note: entry.note.clone(),
            created_at: Utc::now(),
        });
    }

    fn release_lines(&mut self, transaction: &TransactionBilling) {
        for id in &transaction.billing_student_ids.0 {
            if let Some(line) = self.billing_students.get_mut(id) {
                if line.student_id == transaction.student_id
                    && line.payment_status == PaymentStatus::Pending
                {
                    line.payment_status = PaymentStatus::Unpaid;
                }
            }
        }
    }

    fn next_sequence(&mut self, scope: &InvoiceScope) -> Result<i64, AppError> {
        let key = (
            scope.school_id,
            scope.prefix.clone(),
            scope.period.as_str().to_string(),
            scope.date_part.clone(),
        );

        if !self.sequences.contains_key(&key) {
            let stem = scope.stem();
            let last = self
                .transactions
                .iter()
                .filter(|t| t.school_id == scope.school_id)
                .filter(|t| t.invoice_number.starts_with(&stem))
                .filter(|t| scope.contains(t.created_at))
                .max_by_key(|t| t.created_at);
            let seed = match last {
                Some(t) => scope.parse_sequence(&t.invoice_number)?,
                None => 0,
            };
            self.sequences.insert(key.clone(), seed);
        }

        let counter = self.sequences.entry(key).or_insert(0);
        *counter += 1;
        Ok(*counter)
    }
}

/// Same contract as the Postgres repository; one mutex stands in for row locks.
#[derive(Default)]
pub struct MemoryRepository {
    pub store: Mutex<Store>,
    /// Make the next settlement cascades fail this many times
    pub cascade_failures: Mutex<usize>,
    /// Make the next `finalize_intent` calls fail this many times
    pub finalize_failures: Mutex<usize>,
}

impl MemoryRepository {
    pub fn with<R>(&self, f: impl FnOnce(&mut Store) -> R) -> R {
        let mut store = self.store.lock().unwrap();
        f(&mut store)
    }

    pub fn transaction(&self, order_id: &str) -> TransactionBilling {
        self.with(|s| {
            s.transactions
                .iter()
                .find(|t| t.order_id == order_id)
                .cloned()
                .unwrap()
        })
    }

    pub fn line_status(&self, id: Uuid) -> PaymentStatus {
        self.with(|s| s.billing_students[&id].payment_status)
    }

    pub fn history_of(&self, order_id: &str) -> Vec<TransactionBillingHistory> {
        self.with(|s| {
            s.history
                .iter()
                .filter(|h| h.order_id == order_id)
                .cloned()
                .collect()
        })
    }
}

#[async_trait]
impl GatewayAuditLog for MemoryRepository {
    async fn record_exchange(&self, entry: NewGatewayLog) -> Result<(), AppError> {
        self.with(|s| {
            s.gateway_logs.push(GatewayLog {
                id: Uuid::new_v4(),
                order_id: entry.order_id,
                operation: entry.operation.to_string(),
                request: entry.request,
                response: entry.response,
                http_status: entry.http_status,
                created_at: Utc::now(),
            })
        });
        Ok(())
    }
}

#[async_trait]
impl PaymentRepository for MemoryRepository {
    async fn ping(&self) -> Result<(), AppError> {
        Ok(())
    }

    async fn find_principal(&self, token_hash: &str) -> Result<Option<Principal>, AppError> {
        Ok(self.with(|s| s.principals.get(token_hash).cloned()))
    }

    async fn find_student(&self, student_id: Uuid) -> Result<Option<Student>, AppError> {
        Ok(self.with(|s| s.students.get(&student_id).cloned()))
    }

    async fn find_billing(&self, billing_id: Uuid) -> Result<Option<Billing>, AppError> {
        Ok(self.with(|s| s.billings.get(&billing_id).cloned()))
    }

    async fn find_billing_students(&self, ids: &[Uuid]) -> Result<Vec<BillingStudent>, AppError> {
        Ok(self.with(|s| {
            ids.iter()
                .filter_map(|id| s.billing_students.get(id).cloned())
                .collect()
        }))
    }

    async fn find_payment_method(&self, id: Uuid) -> Result<Option<PaymentMethod>, AppError> {
        Ok(self.with(|s| s.methods.get(&id).cloned()))
    }

    async fn find_invoice_format(&self, school_id: Uuid) -> Result<Option<InvoiceFormat>, AppError> {
        Ok(self.with(|s| s.formats.get(&school_id).cloned()))
    }

    async fn upsert_invoice_format(&self, format: NewInvoiceFormat) -> Result<InvoiceFormat, AppError> {
        Ok(self.with(|s| {
            let now = Utc::now();
            let created_at = s
                .formats
                .get(&format.school_id)
                .map(|f| f.created_at)
                .unwrap_or(now);
            let saved = InvoiceFormat {
                id: s
                    .formats
                    .get(&format.school_id)
                    .map(|f| f.id)
                    .unwrap_or_else(Uuid::new_v4),
                school_id: format.school_id,
                prefix: format.prefix,
                format: format.format,
                generated_invoice_format: format.generated_invoice_format,
                created_at,
                updated_at: now,
            };
            s.formats.insert(saved.school_id, saved.clone());
            saved
        }))
    }

    async fn find_transaction(&self, order_id: &str) -> Result<Option<TransactionBilling>, AppError> {
        Ok(self.with(|s| {
            s.transactions
                .iter()
                .find(|t| t.order_id == order_id)
                .cloned()
        }))
    }

    async fn find_detail(
        &self,
        transaction_billing_id: Uuid,
    ) -> Result<Option<TransactionBillingDetail>, AppError> {
        Ok(self.with(|s| {
            s.details
                .iter()
                .find(|d| d.transaction_billing_id == transaction_billing_id)
                .cloned()
        }))
    }

    async fn list_history(
        &self,
        transaction_billing_id: Uuid,
    ) -> Result<Vec<TransactionBillingHistory>, AppError> {
        Ok(self.with(|s| {
            s.history
                .iter()
                .filter(|h| h.transaction_billing_id == transaction_billing_id)
                .cloned()
                .collect()
        }))
    }

    async fn list_gateway_logs(&self, order_id: &str) -> Result<Vec<GatewayLog>, AppError> {
        Ok(self.with(|s| {
            s.gateway_logs
                .iter()
                .filter(|l| l.order_id == order_id)
                .cloned()
                .collect()
        }))
    }

    async fn create_intent(
        &self,
        scope: &InvoiceScope,
        intent: &NewTransactionIntent,
    ) -> Result<TransactionBilling, AppError> {
        self.with(|s| {
            let ids = &intent.billing_student_ids.0;
            let claimable = ids.iter().all(|id| {
                s.billing_students.get(id).is_some_and(|line| {
                    line.student_id == intent.student_id
                        && line.deleted_at.is_none()
                        && line.payment_status == PaymentStatus::Unpaid
                })
            });
            if !claimable {
                return Err(AppError::InvalidBillingSelection(
                    "one or more lines were paid, removed or claimed by another payment".to_string(),
                ));
            }

            let sequence = s.next_sequence(scope)?;
            let invoice_number = scope.render(sequence);

            // The counter bump stays, as with the savepoint in Postgres
            if s
                .transactions
                .iter()
                .any(|t| t.school_id == scope.school_id && t.invoice_number == invoice_number)
            {
                return Err(AppError::InvoiceNumberConflict(invoice_number));
            }
            if s.transactions.iter().any(|t| t.order_id == intent.order_id) {
                return Err(AppError::InvalidRequest(format!(
                    "orderId {} is already in use",
                    intent.order_id
                )));
            }

            let now = Utc::now();
            let transaction = TransactionBilling {
                id: Uuid::new_v4(),
                school_id: scope.school_id,
                student_id: intent.student_id,
                billing_id: intent.billing_id,
                order_id: intent.order_id.clone(),
                invoice_number,
                total_amount: intent.total_amount,
                transaction_status: TransactionStatus::Initiating,
                billing_student_ids: intent.billing_student_ids.clone(),
                is_donation: intent.is_donation,
                account_number: None,
                snap_token: None,
                redirect_url: None,
                expiry_time: Some(intent.expiry_time),
                cascade_status: CascadeStatus::NotRequired,
                created_at: now,
                updated_at: now,
            };

            s.details.push(TransactionBillingDetail {
                id: Uuid::new_v4(),
                transaction_billing_id: transaction.id,
                payment_method_id: intent.payment_method_id,
                payment_method_type: intent.payment_method_type.as_str().to_string(),
                bank_code: intent.bank_code.clone(),
                gross_amount: intent.gross_amount,
                discount: intent.discount,
                admin_fee: intent.admin_fee,
                change_amount: intent.change_amount,
                is_donation: intent.is_donation,
                payment_type: None,
                va_number: None,
                biller_code: None,
                bill_key: None,
                settlement_time: None,
                created_at: now,
            });
            s.push_history(&NewHistoryEntry {
                transaction_billing_id: transaction.id,
                reference_number: None,
                order_id: transaction.order_id.clone(),
                invoice_number: transaction.invoice_number.clone(),
                transaction_status: "initiating".to_string(),
                is_anomaly: false,
                note: None,
            });
            for id in ids {
                if let Some(line) = s.billing_students.get_mut(id) {
                    line.payment_status = PaymentStatus::Pending;
                }
            }

            s.transactions.push(transaction.clone());
            Ok(transaction)
        })
    }

    async fn finalize_intent(
        &self,
        order_id: &str,
        token: &str,
        redirect_url: &str,
    ) -> Result<TransactionBilling, AppError> {
        {
            let mut failures = self.finalize_failures.lock().unwrap();
            if *failures > 0 {
                *failures -= 1;
                return Err(AppError::Internal(format!(
                    "injected finalize failure for {}",
                    order_id
                )));
            }
        }

        self.with(|s| {
            let transaction = s
                .transaction_mut(order_id)
                .ok_or_else(|| AppError::UnknownTransaction(order_id.to_string()))?;
            transaction.snap_token = Some(token.to_string());
            transaction.redirect_url = Some(redirect_url.to_string());
            let promoted = transaction.transaction_status == TransactionStatus::Initiating;
            if promoted {
                transaction.transaction_status = TransactionStatus::Pending;
            }
            let updated = transaction.clone();
            if promoted {
                s.push_history(&NewHistoryEntry {
                    transaction_billing_id: updated.id,
                    reference_number: None,
                    order_id: updated.order_id.clone(),
                    invoice_number: updated.invoice_number.clone(),
                    transaction_status: "pending".to_string(),
                    is_anomaly: false,
                    note: Some("charge opened".to_string()),
                });
            }
            Ok(updated)
        })
    }

    async fn fail_intent(&self, order_id: &str, reason: &str) -> Result<TransactionBilling, AppError> {
        self.with(|s| {
            let transaction = s
                .transaction_mut(order_id)
                .ok_or_else(|| AppError::UnknownTransaction(order_id.to_string()))?;
            if transaction.transaction_status != TransactionStatus::Initiating {
                return Ok(transaction.clone());
            }
            transaction.transaction_status = TransactionStatus::Failed;
            let updated = transaction.clone();
            s.release_lines(&updated);
            s.push_history(&NewHistoryEntry {
                transaction_billing_id: updated.id,
                reference_number: None,
                order_id: updated.order_id.clone(),
                invoice_number: updated.invoice_number.clone(),
                transaction_status: "failed".to_string(),
                is_anomaly: false,
                note: Some(reason.to_string()),
            });
            Ok(updated)
        })
    }

    async fn apply_status(&self, update: &StatusUpdate) -> Result<ApplyOutcome, AppError> {
        self.with(|s| {
            let current = s
                .transactions
                .iter()
                .find(|t| t.order_id == update.order_id)
                .cloned()
                .ok_or_else(|| AppError::UnknownTransaction(update.order_id.clone()))?;

            let entry = |status: &str, is_anomaly: bool| NewHistoryEntry {
                transaction_billing_id: current.id,
                reference_number: update.reference_number.clone(),
                order_id: current.order_id.clone(),
                invoice_number: current.invoice_number.clone(),
                transaction_status: status.to_string(),
                is_anomaly,
                note: Some(update.source.as_str().to_string()),
            };

            match decide_transition(current.transaction_status, update.status) {
                Transition::Replay => Ok(ApplyOutcome::Replayed(current)),
                Transition::Anomaly => {
                    let mut anomaly = entry(&update.gateway_status, true);
                    anomaly.note = Some(format!(
                        "{} reported {} while stored status is {}",
                        update.source.as_str(),
                        update.gateway_status,
                        current.transaction_status
                    ));
                    s.push_history(&anomaly);
                    Ok(ApplyOutcome::Anomaly(current))
                }
                Transition::Refresh => {
                    if let Some(detail) = s.detail_mut(current.id) {
                        if update.va_number.is_some() {
                            detail.va_number = update.va_number.clone();
                        }
                    }
                    let transaction = s.transaction_mut(&update.order_id).unwrap();
                    if update.va_number.is_some() {
                        transaction.account_number = update.va_number.clone();
                    }
                    Ok(ApplyOutcome::Refreshed(transaction.clone()))
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

                    if let Some(detail) = s.detail_mut(current.id) {
                        if update.payment_type.is_some() {
                            detail.payment_type = update.payment_type.clone();
                        }
                        if update.va_number.is_some() {
                            detail.va_number = update.va_number.clone();
                        }
                        if update.settlement_time.is_some() {
                            detail.settlement_time = update.settlement_time;
                        }
                    }

                    let transaction = s.transaction_mut(&update.order_id).unwrap();
                    transaction.transaction_status = status;
                    transaction.cascade_status = cascade;
                    transaction.updated_at = Utc::now();
                    if update.va_number.is_some() {
                        transaction.account_number = update.va_number.clone();
                    }
                    let applied = transaction.clone();

                    if status.is_terminal() && status != TransactionStatus::Settled {
                        s.release_lines(&applied);
                    }
                    s.push_history(&entry(status.as_str(), false));

                    Ok(ApplyOutcome::Applied {
                        transaction: applied,
                        previous: current.transaction_status,
                    })
                }
            }
        })
    }

    async fn settle_billing_students(
        &self,
        transaction: &TransactionBilling,
        paid_at: DateTime<Utc>,
    ) -> Result<(), AppError> {
        {
            let mut failures = self.cascade_failures.lock().unwrap();
            if *failures > 0 {
                *failures -= 1;
                return Err(AppError::CascadeIncomplete(format!(
                    "injected failure for {}",
                    transaction.order_id
                )));
            }
        }

        self.with(|s| {
            let ids = &transaction.billing_student_ids.0;
            let settleable = ids.iter().all(|id| {
                s.billing_students.get(id).is_some_and(|line| {
                    line.student_id == transaction.student_id
                        && line.deleted_at.is_none()
                        && line.payment_status != PaymentStatus::Paid
                })
            });
            if !settleable {
                return Err(AppError::CascadeIncomplete(format!(
                    "not every line of {} could be marked paid",
                    transaction.order_id
                )));
            }

            for id in ids {
                if let Some(line) = s.billing_students.get_mut(id) {
                    line.payment_status = PaymentStatus::Paid;
                    line.payment_date = Some(paid_at);
                }
            }
            if let Some(t) = s.transaction_mut(&transaction.order_id) {
                t.cascade_status = CascadeStatus::Done;
            }
            Ok(())
        })
    }

    async fn flag_cascade_failure(
        &self,
        transaction: &TransactionBilling,
        reason: &str,
    ) -> Result<(), AppError> {
        self.with(|s| {
            if let Some(t) = s.transaction_mut(&transaction.order_id) {
                t.cascade_status = CascadeStatus::Failed;
            }
            s.push_history(&NewHistoryEntry {
                transaction_billing_id: transaction.id,
                reference_number: None,
                order_id: transaction.order_id.clone(),
                invoice_number: transaction.invoice_number.clone(),
                transaction_status: transaction.transaction_status.as_str().to_string(),
                is_anomaly: true,
                note: Some(format!("settlement cascade failed: {}", reason)),
            });
        });
        Ok(())
    }

    async fn append_history(&self, entry: &NewHistoryEntry) -> Result<(), AppError> {
        self.with(|s| s.push_history(entry));
        Ok(())
    }

    async fn list_stale_transactions(
        &self,
        created_before: DateTime<Utc>,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<TransactionBilling>, AppError> {
        Ok(self.with(|s| {
            s.transactions
                .iter()
                .filter(|t| match t.transaction_status {
                    TransactionStatus::Initiating => t.created_at < created_before,
                    TransactionStatus::Pending => t.expiry_time.is_some_and(|e| e < now),
                    _ => false,
                })
                .take(limit as usize)
                .cloned()
                .collect()
        }))
    }

    async fn list_unfinished_cascades(&self, limit: i64) -> Result<Vec<TransactionBilling>, AppError> {
        Ok(self.with(|s| {
            s.transactions
                .iter()
                .filter(|t| {
                    t.transaction_status == TransactionStatus::Settled
                        && matches!(t.cascade_status, CascadeStatus::Pending | CascadeStatus::Failed)
                })
                .take(limit as usize)
                .cloned()
                .collect()
        }))
    }
}

/// Scripted gateway: charges succeed unless a failure is queued; status
/// queries answer from `statuses` or "not found".
#[derive(Default)]
pub struct FakeGateway {
    pub charge_failures: Mutex<VecDeque<GatewayError>>,
    pub charges: Mutex<Vec<ChargeRequest>>,
    pub statuses: Mutex<HashMap<String, StatusUpdate>>,
    pub refunds: Mutex<Vec<(String, i64, String)>>,
}

impl FakeGateway {
    pub fn fail_next_charge(&self, error: GatewayError) {
        self.charge_failures.lock().unwrap().push_back(error);
    }

    pub fn report(&self, order_id: &str, gateway_status: &str) {
        let update = StatusUpdate {
            order_id: order_id.to_string(),
            reference_number: Some(format!("ref-{}", order_id)),
            gateway_status: gateway_status.to_string(),
            status: TransactionStatus::from_gateway(gateway_status, None),
            gross_amount: None,
            payment_type: Some("bank_transfer".to_string()),
            settlement_time: None,
            va_number: Some("12345678901".to_string()),
            biller_code: None,
            bill_key: None,
            source: UpdateSource::Reconciliation,
        };
        self.statuses
            .lock()
            .unwrap()
            .insert(order_id.to_string(), update);
    }

    pub fn charge_count(&self) -> usize {
        self.charges.lock().unwrap().len()
    }

    fn not_found() -> GatewayError {
        GatewayError::Rejected {
            message: "Transaction doesn't exist.".to_string(),
            status_code: Some("404".to_string()),
        }
    }
}

#[async_trait]
impl PaymentGateway for FakeGateway {
    async fn create_charge(&self, request: &ChargeRequest) -> Result<ChargeResponse, GatewayError> {
        self.charges.lock().unwrap().push(request.clone());
        if let Some(error) = self.charge_failures.lock().unwrap().pop_front() {
            return Err(error);
        }
        Ok(ChargeResponse {
            token: format!("snap-{}", request.order_id),
            redirect_url: format!("https://pay.example.com/{}", request.order_id),
        })
    }

    async fn query_status(&self, order_id: &str) -> Result<StatusUpdate, GatewayError> {
        self.statuses
            .lock()
            .unwrap()
            .get(order_id)
            .cloned()
            .ok_or_else(Self::not_found)
    }

    async fn cancel_charge(&self, order_id: &str) -> Result<StatusUpdate, GatewayError> {
        self.report(order_id, "cancel");
        self.query_status(order_id).await
    }

    async fn refund_charge(
        &self,
        order_id: &str,
        amount: i64,
        reason: &str,
    ) -> Result<RefundReceipt, GatewayError> {
        self.refunds
            .lock()
            .unwrap()
            .push((order_id.to_string(), amount, reason.to_string()));
        Ok(RefundReceipt {
            refund_key: format!("{}-refund-1", order_id),
            message: "Success, refund request is approved".to_string(),
        })
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    pub notices: Mutex<Vec<SettlementNotice>>,
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn payment_settled(&self, notice: &SettlementNotice) -> Result<(), NotifyError> {
        self.notices.lock().unwrap().push(notice.clone());
        Ok(())
    }
}

/// One school with a monthly "INV" format, a parent, an admin, a platform
/// operator, a student with two unpaid lines (50,000 and 30,000), a donation
/// billing and three payment methods.
pub struct Fixture {
    pub repo: Arc<MemoryRepository>,
    pub gateway: Arc<FakeGateway>,
    pub notifier: Arc<RecordingNotifier>,
    pub state: AppState,
    pub school_id: Uuid,
    pub student_id: Uuid,
    pub line_ids: Vec<Uuid>,
    pub donation_billing_id: Uuid,
    pub va_method_id: Uuid,
    pub card_method_id: Uuid,
    pub broken_method_id: Uuid,
    pub parent: Principal,
    pub admin: Principal,
    pub operator: Principal,
}

pub fn settings() -> EngineSettings {
    EngineSettings {
        charge_expiry_minutes: 24 * 60,
        invoice_offset: FixedOffset::east_opt(7 * 3600).unwrap(),
        stale_intent_minutes: 15,
    }
}

impl Fixture {
    pub fn new() -> Self {
        let repo = Arc::new(MemoryRepository::default());
        let gateway = Arc::new(FakeGateway::default());
        let notifier = Arc::new(RecordingNotifier::default());

        let school_id = Uuid::new_v4();
        let student_id = Uuid::new_v4();
        let donation_billing_id = Uuid::new_v4();
        let va_method_id = Uuid::new_v4();
        let card_method_id = Uuid::new_v4();
        let broken_method_id = Uuid::new_v4();

        let parent = Principal {
            user_id: Uuid::new_v4(),
            role: Role::Parent,
            school_id: Some(school_id),
        };
        let admin = Principal {
            user_id: Uuid::new_v4(),
            role: Role::SchoolAdmin,
            school_id: Some(school_id),
        };
        let operator = Principal {
            user_id: Uuid::new_v4(),
            role: Role::SuperAdmin,
            school_id: None,
        };

        let line_ids = repo.with(|s| {
            s.principals.insert(hash_token(PARENT_TOKEN), parent.clone());
            s.principals.insert(hash_token(ADMIN_TOKEN), admin.clone());
            s.principals.insert(hash_token(OPERATOR_TOKEN), operator.clone());

            s.students.insert(
                student_id,
                Student {
                    id: student_id,
                    school_id,
                    name: "Budi Santoso".to_string(),
                    deleted_at: None,
                },
            );

            s.formats.insert(
                school_id,
                InvoiceFormat {
                    id: Uuid::new_v4(),
                    school_id,
                    prefix: "INV".to_string(),
                    format: InvoicePeriod::Monthly,
                    generated_invoice_format: "INV000000001".to_string(),
                    created_at: Utc::now(),
                    updated_at: Utc::now(),
                },
            );

            let tuition = Uuid::new_v4();
            s.billings.insert(
                tuition,
                Billing {
                    id: tuition,
                    school_id,
                    name: "Tuition".to_string(),
                    amount: 50_000,
                    is_donation: false,
                    bank_account_number: None,
                    created_at: Utc::now(),
                },
            );
            s.billings.insert(
                donation_billing_id,
                Billing {
                    id: donation_billing_id,
                    school_id,
                    name: "Library Fund".to_string(),
                    amount: 0,
                    is_donation: true,
                    bank_account_number: None,
                    created_at: Utc::now(),
                },
            );

            let lines: Vec<Uuid> = [("SPP Maret", 50_000), ("Uang Buku", 30_000)]
                .into_iter()
                .map(|(name, amount)| {
                    let id = Uuid::new_v4();
                    s.billing_students.insert(
                        id,
                        BillingStudent {
                            id,
                            billing_id: tuition,
                            student_id,
                            name: name.to_string(),
                            amount,
                            due_date: NaiveDate::from_ymd_opt(2024, 3, 31),
                            payment_status: PaymentStatus::Unpaid,
                            payment_date: None,
                            deleted_at: None,
                            created_at: Utc::now(),
                        },
                    );
                    id
                })
                .collect();

            for (id, method_type, bank_code, flat_fee, percentage_fee) in [
                (va_method_id, "virtual_account", Some("bca"), 4_000, None),
                (card_method_id, "credit_card", None, 2_000, Some("2.9")),
                (broken_method_id, "qris", None, 0, Some("abc")),
            ] {
                s.methods.insert(
                    id,
                    PaymentMethod {
                        id,
                        name: format!("{} method", method_type),
                        method_type: method_type.to_string(),
                        bank_code: bank_code.map(str::to_string),
                        flat_fee,
                        percentage_fee: percentage_fee.map(str::to_string),
                        is_active: true,
                    },
                );
            }

            lines
        });

        let state = AppState {
            repo: repo.clone(),
            gateway: gateway.clone(),
            verifier: Arc::new(Sha512Signature::new(SERVER_KEY)),
            notifier: notifier.clone(),
            settings: settings(),
        };

        Self {
            repo,
            gateway,
            notifier,
            state,
            school_id,
            student_id,
            line_ids,
            donation_billing_id,
            va_method_id,
            card_method_id,
            broken_method_id,
            parent,
            admin,
            operator,
        }
    }

    /// Add another line for the fixture student.
    pub fn add_line(&self, name: &str, amount: i64) -> Uuid {
        let id = Uuid::new_v4();
        let billing_id = self.repo.with(|s| s.billing_students[&self.line_ids[0]].billing_id);
        self.repo.with(|s| {
            s.billing_students.insert(
                id,
                BillingStudent {
                    id,
                    billing_id,
                    student_id: self.student_id,
                    name: name.to_string(),
                    amount,
                    due_date: None,
                    payment_status: PaymentStatus::Unpaid,
                    payment_date: None,
                    deleted_at: None,
                    created_at: Utc::now(),
                },
            );
        });
        id
    }
}

/// A notification body signed with `SERVER_KEY`.
pub fn signed_notification(order_id: &str, transaction_status: &str, gross_amount: &str) -> serde_json::Value {
    let status_code = match transaction_status {
        "pending" => "201",
        "expire" => "407",
        "deny" | "cancel" | "failure" => "202",
        _ => "200",
    };
    let signature = Sha512Signature::new(SERVER_KEY).expected(&SignatureFields {
        order_id,
        status_code,
        gross_amount,
    });

    serde_json::json!({
        "transaction_time": "2024-03-09 10:15:00",
        "transaction_status": transaction_status,
        "transaction_id": format!("mid-{}", order_id),
        "status_message": "midtrans payment notification",
        "status_code": status_code,
        "signature_key": signature,
        "settlement_time": "2024-03-09 10:20:00",
        "payment_type": "bank_transfer",
        "order_id": order_id,
        "gross_amount": gross_amount,
        "fraud_status": "accept",
        "currency": "IDR",
        "va_numbers": [{ "bank": "bca", "va_number": "12345678901" }]
    })
}

/// Send one request through the full router.
pub async fn send(
    state: &AppState,
    method: &str,
    uri: &str,
    token: Option<&str>,
    body: Option<serde_json::Value>,
) -> (axum::http::StatusCode, serde_json::Value) {
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json");
    if let Some(token) = token {
        builder = builder.header("authorization", format!("Bearer {}", token));
    }
    let body = match body {
        Some(value) => Body::from(value.to_string()),
        None => Body::empty(),
    };

    let response = school_payment_server::app::build_router(state.clone())
        .oneshot(builder.body(body).unwrap())
        .await
        .unwrap();

    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
    (status, value)
}

/// Invoice date part for today in the fixture's time zone.
pub fn month_stem(prefix: &str) -> String {
    let local = Utc::now().with_timezone(&settings().invoice_offset);
    format!("{}{}", prefix, local.format("%m%y"))
}
