//! Matching of completed payments against open invoices.
//!
//! The engine is a pure function over caller-supplied snapshots: no I/O, no
//! state kept between runs, inputs never mutated.

pub mod engine;
pub mod types;

pub use engine::ReconciliationEngine;
pub use types::{
    ExceptionType, InvoiceRecord, InvoiceStatus, MatchType, PaymentRecord,
    ReconciliationException, ReconciliationMatch, ReconciliationResult, ReconciliationSummary,
};
