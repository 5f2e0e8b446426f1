//! Mobile-money rails integration for the rentals platform: M-Pesa, Airtel
//! Money and Tigo Pesa adapters, webhook verification and parsing, and
//! payment-to-invoice reconciliation.

pub mod config;
pub mod logging;
pub mod payments;
pub mod reconciliation;
