//! Reconciliation over JSON snapshots, as fed to the CLI.

use rentals_mobile_money::config::ReconciliationConfig;
use rentals_mobile_money::reconciliation::{
    ExceptionType, InvoiceRecord, MatchType, PaymentRecord, ReconciliationEngine,
};
use serde_json::json;

fn payments() -> Vec<PaymentRecord> {
    serde_json::from_value(json!([
        {
            "id": "pay-1",
            "amount": {"amount_minor_units": 4500000, "currency": "KES"},
            "status": "succeeded",
            "provider": "mpesa",
            "reference": "INV-1001",
            "paid_at": "2024-03-01T07:21:15Z"
        },
        {
            "id": "pay-2",
            "amount": {"amount_minor_units": 5000000, "currency": "KES"},
            "status": "succeeded",
            "provider": "airtel_money"
        },
        {
            "id": "pay-3",
            "amount": {"amount_minor_units": 2000000, "currency": "KES"},
            "status": "pending"
        },
        {
            "id": "pay-4",
            "amount": {"amount_minor_units": 25000000, "currency": "TZS"},
            "status": "succeeded",
            "provider": "tigo_pesa"
        }
    ]))
    .expect("payments snapshot")
}

fn invoices() -> Vec<InvoiceRecord> {
    serde_json::from_value(json!([
        {
            "id": "INV-1001",
            "amount_due": {"amount_minor_units": 4500000, "currency": "KES"},
            "status": "open",
            "due_date": "2024-03-05"
        },
        {
            "id": "INV-1002",
            "amount_due": {"amount_minor_units": 4500000, "currency": "KES"},
            "status": "overdue"
        },
        {
            "id": "INV-0999",
            "amount_due": {"amount_minor_units": 4500000, "currency": "KES"},
            "status": "paid"
        }
    ]))
    .expect("invoices snapshot")
}

#[test]
fn snapshot_reconciles_into_matches_and_exceptions() {
    let result = ReconciliationEngine::default().reconcile(&payments(), &invoices());

    assert_eq!(result.matches.len(), 2);
    assert_eq!(result.matches[0].payment_id, "pay-1");
    assert_eq!(result.matches[0].invoice_id, "INV-1001");
    assert_eq!(result.matches[0].match_type, MatchType::Exact);
    assert_eq!(result.matches[1].payment_id, "pay-2");
    assert_eq!(result.matches[1].invoice_id, "INV-1002");
    assert_eq!(result.matches[1].match_type, MatchType::Overpayment);
    assert_eq!(result.matches[1].amount.amount_minor_units(), 4_500_000);

    let exceptions: Vec<(ExceptionType, &str)> = result
        .exceptions
        .iter()
        .map(|e| (e.exception_type, e.entity_id.as_str()))
        .collect();
    assert_eq!(
        exceptions,
        vec![
            (ExceptionType::AmountMismatch, "pay-2"),
            (ExceptionType::UnmatchedPayment, "pay-4"),
        ]
    );
    assert_eq!(result.summary.payments_considered, 3);
    assert_eq!(result.summary.invoices_considered, 2);
    assert_eq!(result.summary.matched_minor_units.get("KES"), Some(&9_000_000));
}

#[test]
fn strict_mode_reports_overpayment_as_unmatched() {
    let engine = ReconciliationEngine::new(ReconciliationConfig {
        tolerance_minor_units: 1,
        match_outside_tolerance: false,
    });
    let result = engine.reconcile(&payments(), &invoices());
    assert_eq!(result.matches.len(), 1);
    assert_eq!(result.summary.unmatched_payments, 2);
    assert_eq!(result.summary.unmatched_invoices, 1);
    assert_eq!(result.summary.amount_mismatches, 0);
}

#[test]
fn result_serializes_with_upper_case_kinds() {
    let result = ReconciliationEngine::default().reconcile(&payments(), &invoices());
    let rendered = serde_json::to_value(&result).unwrap();
    assert_eq!(rendered["matches"][0]["match_type"], "EXACT");
    assert_eq!(rendered["exceptions"][1]["exception_type"], "UNMATCHED_PAYMENT");

    let again = serde_json::to_value(ReconciliationEngine::default().reconcile(&payments(), &invoices())).unwrap();
    assert_eq!(rendered, again);
}

#[test]
fn invalid_currency_in_snapshot_is_rejected() {
    let parsed = serde_json::from_value::<Vec<PaymentRecord>>(json!([
        {"id": "p", "amount": {"amount_minor_units": 1, "currency": "shillings"}, "status": "succeeded"}
    ]));
    assert!(parsed.is_err());
}
