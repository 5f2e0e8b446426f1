use crate::config::ReconciliationConfig;
use crate::payments::types::{Money, PaymentStatus};
use crate::reconciliation::types::{
    ExceptionType, InvoiceRecord, MatchType, PaymentRecord, ReconciliationException,
    ReconciliationMatch, ReconciliationResult, ReconciliationSummary,
};
use tracing::{debug, info};

/// Greedy first-fit matcher of succeeded payments against open invoices.
///
/// Payments are taken in input order and each claims the first unused
/// same-currency invoice whose amount due is within tolerance. The result is
/// order-dependent rather than an optimal assignment, and identical inputs
/// always give identical output.
#[derive(Debug, Clone, Default)]
pub struct ReconciliationEngine {
    config: ReconciliationConfig,
}

impl ReconciliationEngine {
    pub fn new(config: ReconciliationConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ReconciliationConfig {
        &self.config
    }

    pub fn reconcile(
        &self,
        payments: &[PaymentRecord],
        invoices: &[InvoiceRecord],
    ) -> ReconciliationResult {
        let completed: Vec<&PaymentRecord> = payments
            .iter()
            .filter(|p| p.status == PaymentStatus::Succeeded)
            .collect();
        let open: Vec<&InvoiceRecord> = invoices.iter().filter(|i| i.is_open()).collect();

        let mut used = vec![false; open.len()];
        let mut assigned: Vec<Option<(usize, bool)>> = vec![None; completed.len()];

        // First-fit within tolerance over every payment before any fallback,
        // so an out-of-tolerance payment never takes an invoice that a later
        // payment settles exactly.
        for (slot, payment) in assigned.iter_mut().zip(&completed) {
            let idx = open.iter().enumerate().position(|(idx, invoice)| {
                !used[idx]
                    && payment.amount.same_currency(&invoice.amount_due)
                    && self.within_tolerance(&payment.amount, &invoice.amount_due)
            });
            if let Some(idx) = idx {
                used[idx] = true;
                *slot = Some((idx, false));
            }
        }

        if self.config.match_outside_tolerance {
            for (slot, payment) in assigned.iter_mut().zip(&completed) {
                if slot.is_some() {
                    continue;
                }
                let idx = open.iter().enumerate().position(|(idx, invoice)| {
                    !used[idx] && payment.amount.same_currency(&invoice.amount_due)
                });
                if let Some(idx) = idx {
                    used[idx] = true;
                    *slot = Some((idx, true));
                }
            }
        }

        let mut matches = Vec::new();
        let mut exceptions = Vec::new();
        for (slot, payment) in assigned.iter().zip(&completed) {
            let Some((idx, outside_tolerance)) = *slot else {
                debug!(payment_id = %payment.id, "payment has no candidate invoice");
                exceptions.push(ReconciliationException {
                    exception_type: ExceptionType::UnmatchedPayment,
                    entity_id: payment.id.clone(),
                    amount: payment.amount.clone(),
                    description: format!(
                        "no open {} invoice for payment of {}",
                        payment.amount.currency(),
                        payment.amount
                    ),
                });
                continue;
            };

            let invoice = open[idx];
            let paid = payment.amount.amount_minor_units();
            let due = invoice.amount_due.amount_minor_units();
            let match_type = classify(paid, due);
            matches.push(ReconciliationMatch {
                payment_id: payment.id.clone(),
                invoice_id: invoice.id.clone(),
                amount: with_amount(&payment.amount, paid.min(due)),
                match_type,
            });

            if outside_tolerance {
                exceptions.push(ReconciliationException {
                    exception_type: ExceptionType::AmountMismatch,
                    entity_id: payment.id.clone(),
                    amount: with_amount(&payment.amount, paid.abs_diff(due)),
                    description: format!(
                        "payment of {} matched to invoice {} due {}",
                        payment.amount, invoice.id, invoice.amount_due
                    ),
                });
            }
        }

        for (idx, invoice) in open.iter().enumerate() {
            if !used[idx] {
                exceptions.push(ReconciliationException {
                    exception_type: ExceptionType::UnmatchedInvoice,
                    entity_id: invoice.id.clone(),
                    amount: invoice.amount_due.clone(),
                    description: format!("no payment found for invoice due {}", invoice.amount_due),
                });
            }
        }

        let summary = summarize(completed.len(), open.len(), &matches, &exceptions);
        info!(
            payments = summary.payments_considered,
            invoices = summary.invoices_considered,
            matches = matches.len(),
            exceptions = exceptions.len(),
            "reconciliation completed"
        );
        ReconciliationResult {
            matches,
            exceptions,
            summary,
        }
    }

    fn within_tolerance(&self, paid: &Money, due: &Money) -> bool {
        paid.amount_minor_units()
            .abs_diff(due.amount_minor_units())
            <= self.config.tolerance_minor_units
    }
}

fn classify(paid: u64, due: u64) -> MatchType {
    match paid.cmp(&due) {
        std::cmp::Ordering::Equal => MatchType::Exact,
        std::cmp::Ordering::Greater => MatchType::Overpayment,
        std::cmp::Ordering::Less => MatchType::Partial,
    }
}

/// Same currency as `template`, different amount. Currency was validated
/// when `template` was built, so this cannot fail in practice.
fn with_amount(template: &Money, amount_minor_units: u64) -> Money {
    Money::new(amount_minor_units, template.currency()).unwrap_or_else(|_| template.clone())
}

fn summarize(
    payments_considered: usize,
    invoices_considered: usize,
    matches: &[ReconciliationMatch],
    exceptions: &[ReconciliationException],
) -> ReconciliationSummary {
    let mut summary = ReconciliationSummary {
        payments_considered,
        invoices_considered,
        ..ReconciliationSummary::default()
    };
    for m in matches {
        match m.match_type {
            MatchType::Exact => summary.exact_matches += 1,
            MatchType::Partial => summary.partial_matches += 1,
            MatchType::Overpayment => summary.overpayment_matches += 1,
        }
        *summary
            .matched_minor_units
            .entry(m.amount.currency().to_string())
            .or_insert(0) += m.amount.amount_minor_units();
    }
    for e in exceptions {
        match e.exception_type {
            ExceptionType::UnmatchedPayment => summary.unmatched_payments += 1,
            ExceptionType::UnmatchedInvoice => summary.unmatched_invoices += 1,
            ExceptionType::AmountMismatch => summary.amount_mismatches += 1,
        }
    }
    summary
}
