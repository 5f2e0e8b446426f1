//! Request validation shared by every rail: currency pairing, amount limits,
//! MSISDN normalization and field truncation.

use crate::payments::error::{PaymentError, PaymentResult};
use crate::payments::types::{CollectionRequest, DisbursementRequest, Money, ProviderName};

/// Length of a normalized East-African MSISDN (3-digit calling code + 9 digits).
pub const NORMALIZED_MSISDN_LEN: usize = 12;

/// Normalizes a phone number to `<calling code><subscriber number>`.
///
/// Non-digits are stripped, a leading trunk `0` is replaced by the calling
/// code and numbers without the calling code get it prepended. Anything that
/// does not end up exactly twelve digits long is rejected.
pub fn normalize_msisdn(
    provider: ProviderName,
    raw: &str,
    calling_code: &str,
) -> PaymentResult<String> {
    let digits: String = raw.chars().filter(char::is_ascii_digit).collect();
    if digits.is_empty() {
        return Err(PaymentError::validation(
            provider,
            "phone number is required",
            "phone",
        ));
    }

    let normalized = if let Some(rest) = digits.strip_prefix('0') {
        format!("{}{}", calling_code, rest)
    } else if digits.starts_with(calling_code) {
        digits
    } else {
        format!("{}{}", calling_code, digits)
    };

    if normalized.len() != NORMALIZED_MSISDN_LEN {
        return Err(PaymentError::validation(
            provider,
            format!(
                "phone number must normalize to {} digits",
                NORMALIZED_MSISDN_LEN
            ),
            "phone",
        ));
    }
    Ok(normalized)
}

/// Truncates to at most `max` characters, never splitting a character.
pub fn truncate(value: &str, max: usize) -> String {
    value.trim().chars().take(max).collect()
}

/// Inclusive transfer limits in major units.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AmountLimits {
    pub min: u64,
    pub max: u64,
}

impl AmountLimits {
    pub const fn new(min: u64, max: u64) -> Self {
        Self { min, max }
    }

    pub fn contains(&self, major: u64) -> bool {
        major >= self.min && major <= self.max
    }
}

/// Per-rail validation rules.
#[derive(Debug, Clone)]
pub struct RailRules {
    pub provider: ProviderName,
    pub currency: String,
    pub calling_code: String,
    pub collection_limits: AmountLimits,
    pub disbursement_limits: AmountLimits,
    pub reference_max_len: usize,
    pub description_max_len: usize,
}

/// A collection request after validation, ready to put on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedCollection {
    pub amount_major: u64,
    pub msisdn: String,
    pub reference: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedDisbursement {
    pub amount_major: u64,
    pub msisdn: String,
    pub reference: String,
    pub remarks: String,
    pub occasion: String,
}

impl RailRules {
    pub fn prepare_collection(&self, request: &CollectionRequest) -> PaymentResult<PreparedCollection> {
        let amount_major = self.check_amount(&request.amount, self.collection_limits)?;
        let reference = self.check_reference(&request.reference)?;
        let msisdn = normalize_msisdn(self.provider, &request.payer_phone, &self.calling_code)?;
        let description = truncate(
            request.description.as_deref().unwrap_or(&request.reference),
            self.description_max_len,
        );

        Ok(PreparedCollection {
            amount_major,
            msisdn,
            reference,
            description,
        })
    }

    pub fn prepare_disbursement(
        &self,
        request: &DisbursementRequest,
        remarks_max_len: usize,
    ) -> PaymentResult<PreparedDisbursement> {
        let amount_major = self.check_amount(&request.amount, self.disbursement_limits)?;
        let reference = self.check_reference(&request.reference)?;
        let msisdn = normalize_msisdn(self.provider, &request.recipient_phone, &self.calling_code)?;
        if request.remarks.trim().is_empty() {
            return Err(PaymentError::validation(
                self.provider,
                "remarks are required",
                "remarks",
            ));
        }

        Ok(PreparedDisbursement {
            amount_major,
            msisdn,
            reference,
            remarks: truncate(&request.remarks, remarks_max_len),
            occasion: truncate(request.occasion.as_deref().unwrap_or(""), remarks_max_len),
        })
    }

    fn check_amount(&self, amount: &Money, limits: AmountLimits) -> PaymentResult<u64> {
        if amount.currency() != self.currency {
            return Err(PaymentError::validation(
                self.provider,
                format!(
                    "{} accepts {} only, got {}",
                    self.provider.display_name(),
                    self.currency,
                    amount.currency()
                ),
                "currency",
            ));
        }
        let major = amount
            .to_major_units()
            .map_err(|e| PaymentError::validation(self.provider, e.to_string(), "amount"))?;
        if !limits.contains(major) {
            return Err(PaymentError::validation(
                self.provider,
                format!(
                    "amount {} {} is outside the allowed range {}-{}",
                    major, self.currency, limits.min, limits.max
                ),
                "amount",
            ));
        }
        Ok(major)
    }

    fn check_reference(&self, reference: &str) -> PaymentResult<String> {
        let reference = truncate(reference, self.reference_max_len);
        if reference.is_empty() {
            return Err(PaymentError::validation(
                self.provider,
                "reference is required",
                "reference",
            ));
        }
        Ok(reference)
    }
}
