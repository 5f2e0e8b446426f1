use anyhow::{bail, Context};
use rentals_mobile_money::config::AppConfig;
use rentals_mobile_money::logging::init_tracing;
use rentals_mobile_money::reconciliation::{InvoiceRecord, PaymentRecord, ReconciliationEngine};
use serde::de::DeserializeOwned;
use std::path::Path;
use tracing::info;

const USAGE: &str = "usage: mobile-money-reconcile <payments.json> <invoices.json>";

fn read_snapshot<T: DeserializeOwned>(path: &Path) -> anyhow::Result<Vec<T>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("failed to parse {}", path.display()))
}

fn main() -> anyhow::Result<()> {
    let config = AppConfig::from_env().context("failed to load configuration")?;
    config.validate().context("invalid configuration")?;
    init_tracing(&config.logging);

    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.len() != 2 {
        bail!(USAGE);
    }
    let payments: Vec<PaymentRecord> = read_snapshot(Path::new(&args[0]))?;
    let invoices: Vec<InvoiceRecord> = read_snapshot(Path::new(&args[1]))?;
    info!(
        payments = payments.len(),
        invoices = invoices.len(),
        "snapshots loaded"
    );

    let engine = ReconciliationEngine::new(config.reconciliation);
    let result = engine.reconcile(&payments, &invoices);
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}
