use crate::config::{optional_var, required_var, ConfigError, Environment};
use crate::payments::callback;
use crate::payments::error::{PaymentError, PaymentResult};
use crate::payments::provider::{PaymentProvider, ProviderDeps};
use crate::payments::types::{
    CallbackEvent, CallbackKind, CollectionRequest, Money, PaymentResponse, PaymentStatus,
    ProviderName,
};
use crate::payments::validation::{truncate, AmountLimits, PreparedCollection, RailRules};
use crate::payments::xml::{self, XmlDocument};
use async_trait::async_trait;
use chrono::Utc;
use reqwest::Method;
use std::fmt;
use tracing::{debug, info, warn};

pub const SANDBOX_BASE_URL: &str = "https://accessgwtest.tigo.co.tz:8443";
pub const PRODUCTION_BASE_URL: &str = "https://accessgw.tigo.co.tz:8443";
pub const DEFAULT_COLLECTION_PATH: &str = "/API/BillerPayments/BillerPay";

const CURRENCY: &str = "TZS";
const CALLING_CODE: &str = "255";
const REFERENCE_MAX_LEN: usize = 50;
const COMPANY_NAME_MAX_LEN: usize = 100;
const LIMITS: AmountLimits = AmountLimits::new(1_000, 10_000_000);

#[derive(Clone)]
pub struct TigoConfig {
    pub api_key: String,
    /// Key for the `X-Signature` HMAC over outbound bodies.
    pub api_secret: String,
    pub biller_code: String,
    pub company_name: String,
    pub callback_secret: Option<String>,
    pub environment: Environment,
    pub base_url: Option<String>,
    pub collection_path: String,
}

impl TigoConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            api_key: required_var("TIGO_API_KEY")?,
            api_secret: required_var("TIGO_API_SECRET")?,
            biller_code: required_var("TIGO_BILLER_CODE")?,
            company_name: required_var("TIGO_COMPANY_NAME")?,
            callback_secret: optional_var("TIGO_CALLBACK_SECRET"),
            environment: Environment::from_env("TIGO_ENVIRONMENT")?,
            base_url: optional_var("TIGO_BASE_URL"),
            collection_path: optional_var("TIGO_COLLECTION_PATH")
                .unwrap_or_else(|| DEFAULT_COLLECTION_PATH.to_string()),
        })
    }

    pub fn base_url(&self) -> String {
        let url = match (&self.base_url, self.environment) {
            (Some(url), _) => url.as_str(),
            (None, Environment::Sandbox) => SANDBOX_BASE_URL,
            (None, Environment::Production) => PRODUCTION_BASE_URL,
        };
        url.trim_end_matches('/').to_string()
    }
}

impl fmt::Debug for TigoConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TigoConfig")
            .field("biller_code", &self.biller_code)
            .field("company_name", &self.company_name)
            .field("environment", &self.environment)
            .field("base_url", &self.base_url)
            .field("collection_path", &self.collection_path)
            .finish_non_exhaustive()
    }
}

pub struct TigoProvider {
    config: TigoConfig,
    deps: ProviderDeps,
    rules: RailRules,
    endpoint: String,
}

impl TigoProvider {
    pub fn new(config: TigoConfig, deps: ProviderDeps) -> Self {
        let endpoint = format!("{}{}", config.base_url(), config.collection_path);
        Self {
            config,
            deps,
            rules: rail_rules(),
            endpoint,
        }
    }

    fn collection_document(&self, txn_id: &str, prepared: &PreparedCollection) -> String {
        XmlDocument::new("COMMAND")
            .field("TXNID", txn_id)
            .field("MSISDN", &prepared.msisdn)
            .field("AMOUNT", prepared.amount_major)
            .field(
                "COMPANYNAME",
                truncate(&self.config.company_name, COMPANY_NAME_MAX_LEN),
            )
            .field("BILLERCODE", &self.config.biller_code)
            .field("CUSTOMERREFERENCEID", &prepared.reference)
            .render()
    }
}

pub fn rail_rules() -> RailRules {
    RailRules {
        provider: ProviderName::TigoPesa,
        currency: CURRENCY.to_string(),
        calling_code: CALLING_CODE.to_string(),
        collection_limits: LIMITS,
        disbursement_limits: LIMITS,
        reference_max_len: REFERENCE_MAX_LEN,
        description_max_len: REFERENCE_MAX_LEN,
    }
}

fn status_from_text(status: &str) -> PaymentStatus {
    match status.trim().to_uppercase().as_str() {
        "SUCCESS" | "SUCCESSFUL" => PaymentStatus::Succeeded,
        "PENDING" => PaymentStatus::Pending,
        "CANCELLED" | "CANCELED" => PaymentStatus::Cancelled,
        _ => PaymentStatus::Failed,
    }
}

#[async_trait]
impl PaymentProvider for TigoProvider {
    fn name(&self) -> ProviderName {
        ProviderName::TigoPesa
    }

    fn currency(&self) -> &str {
        CURRENCY
    }

    fn validate_collection(&self, request: &CollectionRequest) -> PaymentResult<PreparedCollection> {
        self.rules.prepare_collection(request)
    }

    async fn initiate_collection(&self, request: CollectionRequest) -> PaymentResult<PaymentResponse> {
        let prepared = self.validate_collection(&request)?;
        let txn_id = uuid::Uuid::new_v4().simple().to_string();
        let document = self.collection_document(&txn_id, &prepared);
        let signature = callback::sign(document.as_bytes(), &self.config.api_secret);
        debug!(
            provider = %ProviderName::TigoPesa,
            correlation_id = %txn_id,
            "sending bill payment push"
        );

        let request = self
            .deps
            .http
            .request(Method::POST, &self.endpoint)
            .header("Content-Type", "application/xml")
            .header("X-Api-Key", self.config.api_key.as_str())
            .header("X-Signature", signature)
            .body(document);
        let reply = match self
            .deps
            .http
            .send(ProviderName::TigoPesa, request)
            .await
            .and_then(|reply| reply.ok())
        {
            Ok(reply) => reply,
            Err(e) => {
                warn!(
                    provider = %ProviderName::TigoPesa,
                    correlation_id = %txn_id,
                    error_code = e.code(),
                    "bill payment push failed"
                );
                return Err(e);
            }
        };

        let status = xml::extract_tag(&reply.body, "STATUS").unwrap_or_default();
        let message = xml::extract_tag(&reply.body, "MESSAGE");
        if !matches!(status.to_uppercase().as_str(), "SUCCESS" | "PENDING") {
            warn!(
                provider = %ProviderName::TigoPesa,
                correlation_id = %txn_id,
                status = %status,
                "bill payment push rejected"
            );
            return Err(PaymentError::ProviderError {
                provider: ProviderName::TigoPesa,
                message: message.unwrap_or_else(|| format!("unexpected status {:?}", status)),
                provider_code: xml::extract_tag(&reply.body, "ERRORCODE")
                    .or_else(|| Some(status).filter(|s| !s.is_empty())),
                retryable: false,
            });
        }

        let provider_reference = xml::extract_tag(&reply.body, "TXNID").unwrap_or(txn_id);
        info!(
            provider = %ProviderName::TigoPesa,
            correlation_id = %provider_reference,
            reference = %prepared.reference,
            amount = prepared.amount_major,
            "bill payment push initiated"
        );
        Ok(PaymentResponse {
            provider: ProviderName::TigoPesa,
            status: PaymentStatus::Pending,
            provider_reference,
            secondary_reference: xml::extract_tag(&reply.body, "REFERENCEID"),
            reference: prepared.reference,
            customer_message: message,
        })
    }

    fn verify_callback(&self, payload: &[u8], signature: Option<&str>) -> PaymentResult<()> {
        callback::require_valid_signature(
            ProviderName::TigoPesa,
            payload,
            signature,
            self.config.callback_secret.as_deref(),
        )
    }

    fn parse_callback(&self, payload: &[u8]) -> PaymentResult<CallbackEvent> {
        parse_callback_payload(payload)
    }
}

/// Parses the `<COMMAND>` notification; `TXNID` and `STATUS` are required.
pub fn parse_callback_payload(payload: &[u8]) -> PaymentResult<CallbackEvent> {
    let body = std::str::from_utf8(payload).map_err(|_| {
        PaymentError::callback(ProviderName::TigoPesa, "callback body is not valid UTF-8")
    })?;
    let txn_id = xml::extract_tag(body, "TXNID")
        .ok_or_else(|| PaymentError::callback(ProviderName::TigoPesa, "callback has no TXNID"))?;
    let status = xml::extract_tag(body, "STATUS")
        .ok_or_else(|| PaymentError::callback(ProviderName::TigoPesa, "callback has no STATUS"))?;
    let amount = xml::extract_tag(body, "AMOUNT")
        .map(|v| {
            Money::from_major_str(&v, CURRENCY).map_err(|e| {
                PaymentError::callback(ProviderName::TigoPesa, format!("invalid amount: {}", e))
            })
        })
        .transpose()?;

    Ok(CallbackEvent {
        provider: ProviderName::TigoPesa,
        kind: CallbackKind::Collection,
        provider_transaction_id: txn_id,
        reference: xml::extract_tag(body, "CUSTOMERREFERENCEID"),
        status: status_from_text(&status),
        amount,
        receipt_number: xml::extract_tag(body, "REFERENCEID"),
        payer_phone: xml::extract_tag(body, "MSISDN"),
        transaction_date: None,
        result_code: Some(status),
        result_description: xml::extract_tag(body, "MESSAGE"),
        raw_payload: body.to_string(),
        received_at: Utc::now(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payments::retry::RetryPolicy;
    use crate::payments::token_cache::TokenCache;
    use crate::payments::utils::PaymentHttpClient;
    use std::sync::Arc;
    use std::time::Duration;

    fn provider() -> TigoProvider {
        let deps = ProviderDeps::new(
            PaymentHttpClient::new(Duration::from_secs(5)).unwrap(),
            Arc::new(TokenCache::default()),
            RetryPolicy::none(),
        );
        TigoProvider::new(
            TigoConfig {
                api_key: "api-key".to_string(),
                api_secret: "api-secret".to_string(),
                biller_code: "400700".to_string(),
                company_name: "Msasani Apartments & Co".to_string(),
                callback_secret: None,
                environment: Environment::Sandbox,
                base_url: None,
                collection_path: DEFAULT_COLLECTION_PATH.to_string(),
            },
            deps,
        )
    }

    #[test]
    fn collection_document_carries_all_fields() {
        let provider = provider();
        let prepared = PreparedCollection {
            amount_major: 250_000,
            msisdn: "255754123456".to_string(),
            reference: "LEASE-2024-09".to_string(),
            description: "LEASE-2024-09".to_string(),
        };
        let document = provider.collection_document("TX123", &prepared);
        assert_eq!(xml::extract_tag(&document, "TXNID").as_deref(), Some("TX123"));
        assert_eq!(xml::extract_tag(&document, "MSISDN").as_deref(), Some("255754123456"));
        assert_eq!(xml::extract_tag(&document, "AMOUNT").as_deref(), Some("250000"));
        assert_eq!(xml::extract_tag(&document, "BILLERCODE").as_deref(), Some("400700"));
        assert_eq!(
            xml::extract_tag(&document, "COMPANYNAME").as_deref(),
            Some("Msasani Apartments & Co")
        );
        assert_eq!(
            xml::extract_tag(&document, "CUSTOMERREFERENCEID").as_deref(),
            Some("LEASE-2024-09")
        );
    }

    #[test]
    fn callback_parses_optional_fields() {
        let body = b"<COMMAND><TXNID>TX123</TXNID><STATUS>SUCCESS</STATUS>\
            <MSISDN>255754123456</MSISDN><AMOUNT>250000</AMOUNT>\
            <CUSTOMERREFERENCEID>LEASE-2024-09</CUSTOMERREFERENCEID></COMMAND>";
        let event = parse_callback_payload(body).unwrap();
        assert_eq!(event.status, PaymentStatus::Succeeded);
        assert_eq!(event.provider_transaction_id, "TX123");
        assert_eq!(event.reference.as_deref(), Some("LEASE-2024-09"));
        assert_eq!(event.amount, Some(Money::from_major(250_000, "TZS").unwrap()));
        assert_eq!(event.result_description, None);
    }

    #[test]
    fn callback_requires_txnid_and_status() {
        let no_id = b"<COMMAND><STATUS>SUCCESS</STATUS></COMMAND>";
        let no_status = b"<COMMAND><TXNID>TX1</TXNID></COMMAND>";
        assert!(matches!(
            parse_callback_payload(no_id),
            Err(PaymentError::CallbackError { provider: ProviderName::TigoPesa, .. })
        ));
        assert!(parse_callback_payload(no_status).is_err());
    }

    #[test]
    fn callback_status_text_is_mapped() {
        assert_eq!(status_from_text("PENDING"), PaymentStatus::Pending);
        assert_eq!(status_from_text("canceled"), PaymentStatus::Cancelled);
        assert_eq!(status_from_text("FAILED"), PaymentStatus::Failed);
    }

    #[tokio::test]
    async fn status_query_is_unsupported() {
        let provider = provider();
        assert!(!provider.supports_status_query());
        assert!(matches!(
            provider.query_status("TX123").await,
            Err(PaymentError::Unsupported { .. })
        ));
    }
}
