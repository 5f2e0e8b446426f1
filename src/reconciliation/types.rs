use crate::payments::types::{Money, PaymentStatus, ProviderName};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A payment as recorded by the caller. Read-only here.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PaymentRecord {
    pub id: String,
    pub amount: Money,
    pub status: PaymentStatus,
    #[serde(default)]
    pub provider: Option<ProviderName>,
    #[serde(default)]
    pub reference: Option<String>,
    #[serde(default)]
    pub paid_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceStatus {
    Draft,
    Open,
    PartiallyPaid,
    Overdue,
    Paid,
    Cancelled,
}

impl InvoiceStatus {
    pub fn is_settled(&self) -> bool {
        matches!(self, InvoiceStatus::Paid | InvoiceStatus::Cancelled)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InvoiceRecord {
    pub id: String,
    pub amount_due: Money,
    pub status: InvoiceStatus,
    #[serde(default)]
    pub due_date: Option<NaiveDate>,
}

impl InvoiceRecord {
    /// Still collectable: not paid or cancelled, and something is owed.
    pub fn is_open(&self) -> bool {
        !self.status.is_settled() && !self.amount_due.is_zero()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MatchType {
    Exact,
    Partial,
    Overpayment,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReconciliationMatch {
    pub payment_id: String,
    pub invoice_id: String,
    /// `min(payment amount, invoice amount due)`.
    pub amount: Money,
    pub match_type: MatchType,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExceptionType {
    UnmatchedPayment,
    UnmatchedInvoice,
    AmountMismatch,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReconciliationException {
    pub exception_type: ExceptionType,
    pub entity_id: String,
    pub amount: Money,
    pub description: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReconciliationSummary {
    pub payments_considered: usize,
    pub invoices_considered: usize,
    pub exact_matches: usize,
    pub partial_matches: usize,
    pub overpayment_matches: usize,
    pub unmatched_payments: usize,
    pub unmatched_invoices: usize,
    pub amount_mismatches: usize,
    /// Matched minor units per currency code.
    pub matched_minor_units: BTreeMap<String, u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReconciliationResult {
    pub matches: Vec<ReconciliationMatch>,
    pub exceptions: Vec<ReconciliationException>,
    pub summary: ReconciliationSummary,
}
