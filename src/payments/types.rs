use bigdecimal::{BigDecimal, ToPrimitive};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum ProviderName {
    Mpesa,
    AirtelMoney,
    TigoPesa,
}

impl ProviderName {
    pub const ALL: [ProviderName; 3] = [
        ProviderName::Mpesa,
        ProviderName::AirtelMoney,
        ProviderName::TigoPesa,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderName::Mpesa => "mpesa",
            ProviderName::AirtelMoney => "airtel_money",
            ProviderName::TigoPesa => "tigo_pesa",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            ProviderName::Mpesa => "M-Pesa",
            ProviderName::AirtelMoney => "Airtel Money",
            ProviderName::TigoPesa => "Tigo Pesa",
        }
    }
}

impl fmt::Display for ProviderName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ProviderName {
    type Err = UnknownProvider;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "mpesa" | "m-pesa" => Ok(ProviderName::Mpesa),
            "airtel" | "airtel_money" | "airtel-money" => Ok(ProviderName::AirtelMoney),
            "tigo" | "tigo_pesa" | "tigo-pesa" | "tigopesa" => Ok(ProviderName::TigoPesa),
            _ => Err(UnknownProvider(value.to_string())),
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unsupported provider: {0}")]
pub struct UnknownProvider(pub String);

// ---------------------------------------------------------------------------
// Money
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MoneyError {
    #[error("invalid currency code: {0}")]
    InvalidCurrency(String),

    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    #[error("amount {amount} {currency} is not a whole number of major units")]
    FractionalMajorUnits { amount: u64, currency: String },
}

/// Number of decimal places between the major and minor unit of a currency.
pub fn minor_unit_exponent(currency: &str) -> u32 {
    match currency {
        "UGX" | "RWF" | "BIF" | "XAF" | "XOF" => 0,
        _ => 2,
    }
}

/// Monetary amount in the currency's smallest unit. Immutable once built.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(try_from = "MoneyRepr")]
pub struct Money {
    amount_minor_units: u64,
    currency: String,
}

#[derive(Deserialize)]
struct MoneyRepr {
    amount_minor_units: u64,
    currency: String,
}

impl TryFrom<MoneyRepr> for Money {
    type Error = MoneyError;

    fn try_from(repr: MoneyRepr) -> Result<Self, Self::Error> {
        Money::new(repr.amount_minor_units, &repr.currency)
    }
}

impl Money {
    pub fn new(amount_minor_units: u64, currency: &str) -> Result<Self, MoneyError> {
        let currency = currency.trim().to_uppercase();
        if currency.len() != 3 || !currency.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(MoneyError::InvalidCurrency(currency));
        }
        Ok(Self {
            amount_minor_units,
            currency,
        })
    }

    pub fn from_major(amount: u64, currency: &str) -> Result<Self, MoneyError> {
        let factor = 10_u64.pow(minor_unit_exponent(&currency.trim().to_uppercase()));
        let minor = amount
            .checked_mul(factor)
            .ok_or_else(|| MoneyError::InvalidAmount(amount.to_string()))?;
        Self::new(minor, currency)
    }

    /// Parses a provider-reported decimal amount ("45000", "1.00", "99.5").
    pub fn from_major_str(amount: &str, currency: &str) -> Result<Self, MoneyError> {
        let parsed = BigDecimal::from_str(amount.trim())
            .map_err(|_| MoneyError::InvalidAmount(amount.to_string()))?;
        let factor = 10_u64.pow(minor_unit_exponent(&currency.trim().to_uppercase()));
        let scaled = parsed * BigDecimal::from(factor);
        if scaled < BigDecimal::from(0) || scaled.with_scale(0) != scaled {
            return Err(MoneyError::InvalidAmount(amount.to_string()));
        }
        let minor = scaled
            .to_u64()
            .ok_or_else(|| MoneyError::InvalidAmount(amount.to_string()))?;
        Self::new(minor, currency)
    }

    pub fn amount_minor_units(&self) -> u64 {
        self.amount_minor_units
    }

    pub fn currency(&self) -> &str {
        &self.currency
    }

    pub fn is_zero(&self) -> bool {
        self.amount_minor_units == 0
    }

    /// Whole major units; rails that take integer amounts reject fractions.
    pub fn to_major_units(&self) -> Result<u64, MoneyError> {
        let factor = 10_u64.pow(minor_unit_exponent(&self.currency));
        if self.amount_minor_units % factor != 0 {
            return Err(MoneyError::FractionalMajorUnits {
                amount: self.amount_minor_units,
                currency: self.currency.clone(),
            });
        }
        Ok(self.amount_minor_units / factor)
    }

    pub fn same_currency(&self, other: &Money) -> bool {
        self.currency == other.currency
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let exponent = minor_unit_exponent(&self.currency);
        if exponent == 0 {
            return write!(f, "{} {}", self.amount_minor_units, self.currency);
        }
        let factor = 10_u64.pow(exponent);
        write!(
            f,
            "{}.{:0width$} {}",
            self.amount_minor_units / factor,
            self.amount_minor_units % factor,
            self.currency,
            width = exponent as usize
        )
    }
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Succeeded,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
#[error("cannot move payment from {from:?} to {to:?}")]
pub struct InvalidTransition {
    pub from: PaymentStatus,
    pub to: PaymentStatus,
}

impl PaymentStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, PaymentStatus::Pending)
    }

    /// Applies an observed status. Redelivery of the same terminal status is
    /// accepted; leaving a terminal status is not.
    pub fn transition_to(self, next: PaymentStatus) -> Result<PaymentStatus, InvalidTransition> {
        match (self, next) {
            (PaymentStatus::Pending, next) => Ok(next),
            (current, next) if current == next => Ok(current),
            (current, PaymentStatus::Pending) => Ok(current),
            (from, to) => Err(InvalidTransition { from, to }),
        }
    }
}

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionRequest {
    pub amount: Money,
    pub payer_phone: String,
    pub reference: String,
    pub description: Option<String>,
}

/// M-Pesa B2C command identifiers.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum B2cCommand {
    #[default]
    BusinessPayment,
    SalaryPayment,
    PromotionPayment,
}

impl B2cCommand {
    pub fn as_str(&self) -> &'static str {
        match self {
            B2cCommand::BusinessPayment => "BusinessPayment",
            B2cCommand::SalaryPayment => "SalaryPayment",
            B2cCommand::PromotionPayment => "PromotionPayment",
        }
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct DisbursementRequest {
    pub amount: Money,
    pub recipient_phone: String,
    pub reference: String,
    pub remarks: String,
    pub occasion: Option<String>,
    #[serde(default)]
    pub command: B2cCommand,
    /// Overrides the initiator configured for the provider.
    pub initiator_name: Option<String>,
    /// Overrides the security credential (or encrypted PIN) configured for the provider.
    pub security_credential: Option<String>,
}

impl fmt::Debug for DisbursementRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DisbursementRequest")
            .field("amount", &self.amount)
            .field("reference", &self.reference)
            .field("remarks", &self.remarks)
            .field("occasion", &self.occasion)
            .field("command", &self.command)
            .field("initiator_name", &self.initiator_name)
            .field(
                "security_credential",
                &self.security_credential.as_ref().map(|_| "***"),
            )
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Responses
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PaymentResponse {
    pub provider: ProviderName,
    pub status: PaymentStatus,
    /// Correlation id echoed back by the provider's callback.
    pub provider_reference: String,
    pub secondary_reference: Option<String>,
    /// Reference as transmitted, after truncation.
    pub reference: String,
    pub customer_message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StatusResponse {
    pub provider: ProviderName,
    pub provider_reference: String,
    pub status: PaymentStatus,
    pub result_code: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CallbackKind {
    Collection,
    Disbursement,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CallbackEvent {
    pub provider: ProviderName,
    pub kind: CallbackKind,
    pub provider_transaction_id: String,
    pub reference: Option<String>,
    pub status: PaymentStatus,
    pub amount: Option<Money>,
    pub receipt_number: Option<String>,
    pub payer_phone: Option<String>,
    pub transaction_date: Option<String>,
    pub result_code: Option<String>,
    pub result_description: Option<String>,
    pub raw_payload: String,
    pub received_at: DateTime<Utc>,
}
