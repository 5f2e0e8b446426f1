use crate::payments::types::ProviderName;
use thiserror::Error;

pub type PaymentResult<T> = Result<T, PaymentError>;

#[derive(Debug, Clone, Error)]
pub enum PaymentError {
    #[error("Validation error: provider={provider}, message={message}")]
    ValidationError {
        provider: ProviderName,
        message: String,
        field: Option<String>,
    },

    #[error("Provider authentication failed: provider={provider}, message={message}")]
    ProviderAuthError {
        provider: ProviderName,
        message: String,
    },

    #[error("Callback rejected: provider={provider}, message={message}")]
    CallbackError {
        provider: ProviderName,
        message: String,
    },

    #[error("Network error: provider={provider}, message={message}")]
    NetworkError {
        provider: ProviderName,
        message: String,
    },

    #[error("Rate limit exceeded: provider={provider}, message={message}")]
    RateLimitError {
        provider: ProviderName,
        message: String,
    },

    #[error("Provider error: provider={provider}, message={message}")]
    ProviderError {
        provider: ProviderName,
        message: String,
        provider_code: Option<String>,
        retryable: bool,
    },

    #[error("Unsupported operation: provider={provider}, operation={operation}")]
    Unsupported {
        provider: ProviderName,
        operation: &'static str,
    },
}

impl PaymentError {
    pub fn validation(provider: ProviderName, message: impl Into<String>, field: &str) -> Self {
        PaymentError::ValidationError {
            provider,
            message: message.into(),
            field: Some(field.to_string()),
        }
    }

    pub fn callback(provider: ProviderName, message: impl Into<String>) -> Self {
        PaymentError::CallbackError {
            provider,
            message: message.into(),
        }
    }

    pub fn provider(&self) -> ProviderName {
        match self {
            PaymentError::ValidationError { provider, .. }
            | PaymentError::ProviderAuthError { provider, .. }
            | PaymentError::CallbackError { provider, .. }
            | PaymentError::NetworkError { provider, .. }
            | PaymentError::RateLimitError { provider, .. }
            | PaymentError::ProviderError { provider, .. }
            | PaymentError::Unsupported { provider, .. } => *provider,
        }
    }

    /// Short machine-readable code used in log fields.
    pub fn code(&self) -> &'static str {
        match self {
            PaymentError::ValidationError { .. } => "validation_error",
            PaymentError::ProviderAuthError { .. } => "provider_auth_error",
            PaymentError::CallbackError { .. } => "callback_error",
            PaymentError::NetworkError { .. } => "network_error",
            PaymentError::RateLimitError { .. } => "rate_limit_error",
            PaymentError::ProviderError { .. } => "provider_error",
            PaymentError::Unsupported { .. } => "unsupported",
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            PaymentError::ValidationError { .. } => false,
            PaymentError::ProviderAuthError { .. } => true,
            PaymentError::CallbackError { .. } => false,
            PaymentError::NetworkError { .. } => true,
            PaymentError::RateLimitError { .. } => true,
            PaymentError::ProviderError { retryable, .. } => *retryable,
            PaymentError::Unsupported { .. } => false,
        }
    }

    pub fn http_status_code(&self) -> u16 {
        match self {
            PaymentError::ValidationError { .. } => 400,
            PaymentError::ProviderAuthError { .. } => 502,
            PaymentError::CallbackError { .. } => 401,
            PaymentError::NetworkError { .. } => 503,
            PaymentError::RateLimitError { .. } => 429,
            PaymentError::ProviderError { .. } => 502,
            PaymentError::Unsupported { .. } => 501,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_http_status_mapping_is_correct() {
        assert_eq!(
            PaymentError::validation(ProviderName::Mpesa, "bad", "amount").http_status_code(),
            400
        );
        assert_eq!(
            PaymentError::RateLimitError {
                provider: ProviderName::AirtelMoney,
                message: "limited".to_string(),
            }
            .http_status_code(),
            429
        );
        assert_eq!(
            PaymentError::callback(ProviderName::TigoPesa, "bad signature").http_status_code(),
            401
        );
    }

    #[test]
    fn retryable_flags_are_set() {
        assert!(PaymentError::NetworkError {
            provider: ProviderName::Mpesa,
            message: "timeout".to_string()
        }
        .is_retryable());
        assert!(PaymentError::ProviderAuthError {
            provider: ProviderName::AirtelMoney,
            message: "invalid client".to_string()
        }
        .is_retryable());
        assert!(!PaymentError::validation(ProviderName::Mpesa, "bad", "amount").is_retryable());
        assert!(!PaymentError::callback(ProviderName::Mpesa, "missing id").is_retryable());
    }

    #[test]
    fn errors_carry_provider_name() {
        let err = PaymentError::validation(ProviderName::TigoPesa, "currency mismatch", "currency");
        assert_eq!(err.provider(), ProviderName::TigoPesa);
        assert!(err.to_string().contains("tigo_pesa"));
        assert_eq!(err.code(), "validation_error");
    }
}
