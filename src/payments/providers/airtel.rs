use crate::config::{optional_var, required_var, ConfigError, Environment};
use crate::payments::callback;
use crate::payments::error::{PaymentError, PaymentResult};
use crate::payments::provider::{PaymentProvider, ProviderDeps};
use crate::payments::retry::with_retry;
use crate::payments::token_cache::{ProviderCredential, TokenSource};
use crate::payments::types::{
    CallbackEvent, CallbackKind, CollectionRequest, DisbursementRequest, PaymentResponse,
    PaymentStatus, ProviderName, StatusResponse,
};
use crate::payments::utils::{json_scalar, HttpReply, PaymentHttpClient};
use crate::payments::validation::{AmountLimits, PreparedCollection, RailRules};
use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Method, RequestBuilder};
use serde::Deserialize;
use serde_json::Value as JsonValue;
use std::fmt;
use std::time::Duration;
use tracing::{debug, info, warn};

pub const SANDBOX_BASE_URL: &str = "https://openapiuat.airtel.africa";
pub const PRODUCTION_BASE_URL: &str = "https://openapi.airtel.africa";

const REFERENCE_MAX_LEN: usize = 50;
const LIMITS: AmountLimits = AmountLimits::new(500, 5_000_000);

const STATUS_SUCCESS: &str = "TS";
const STATUS_AMBIGUOUS: &str = "TA";
const STATUS_IN_PROGRESS: &str = "TIP";

/// Countries served by Airtel Money: ISO code, currency, calling code.
const COUNTRIES: &[(&str, &str, &str)] = &[
    ("KE", "KES", "254"),
    ("UG", "UGX", "256"),
    ("TZ", "TZS", "255"),
    ("RW", "RWF", "250"),
    ("ZM", "ZMW", "260"),
    ("MW", "MWK", "265"),
];

/// Currency and calling code for an Airtel country.
pub fn country_details(country: &str) -> Option<(&'static str, &'static str)> {
    let country = country.trim().to_uppercase();
    COUNTRIES
        .iter()
        .find(|(code, _, _)| *code == country)
        .map(|(_, currency, calling_code)| (*currency, *calling_code))
}

#[derive(Clone)]
pub struct AirtelConfig {
    pub client_id: String,
    pub client_secret: String,
    pub country: String,
    /// Encrypted disbursement PIN.
    pub disbursement_pin: Option<String>,
    pub callback_secret: Option<String>,
    pub environment: Environment,
    pub base_url: Option<String>,
}

impl AirtelConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let country = optional_var("AIRTEL_COUNTRY")
            .unwrap_or_else(|| "KE".to_string())
            .trim()
            .to_uppercase();
        if country_details(&country).is_none() {
            return Err(ConfigError::InvalidValue(format!(
                "AIRTEL_COUNTRY {} is not an Airtel Money market",
                country
            )));
        }
        Ok(Self {
            client_id: required_var("AIRTEL_CLIENT_ID")?,
            client_secret: required_var("AIRTEL_CLIENT_SECRET")?,
            country,
            disbursement_pin: optional_var("AIRTEL_DISBURSEMENT_PIN"),
            callback_secret: optional_var("AIRTEL_CALLBACK_SECRET"),
            environment: Environment::from_env("AIRTEL_ENVIRONMENT")?,
            base_url: optional_var("AIRTEL_BASE_URL"),
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

impl fmt::Debug for AirtelConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AirtelConfig")
            .field("client_id", &self.client_id)
            .field("country", &self.country)
            .field("environment", &self.environment)
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

/// OAuth2 client-credentials exchange (`POST /auth/oauth2/token`).
pub struct AirtelTokenSource {
    http: PaymentHttpClient,
    base_url: String,
    client_id: String,
    client_secret: String,
}

#[derive(Debug, Deserialize)]
struct TokenReply {
    access_token: String,
    expires_in: JsonValue,
}

#[async_trait]
impl TokenSource for AirtelTokenSource {
    fn provider(&self) -> ProviderName {
        ProviderName::AirtelMoney
    }

    fn client_id(&self) -> &str {
        &self.client_id
    }

    async fn fetch_token(&self) -> PaymentResult<ProviderCredential> {
        let body = serde_json::json!({
            "client_id": self.client_id,
            "client_secret": self.client_secret,
            "grant_type": "client_credentials",
        });
        let request = self
            .http
            .request(Method::POST, &format!("{}/auth/oauth2/token", self.base_url))
            .json(&body);
        let reply = self.http.send(ProviderName::AirtelMoney, request).await?;
        if !reply.is_success() {
            return Err(PaymentError::ProviderAuthError {
                provider: ProviderName::AirtelMoney,
                message: format!("token exchange failed with HTTP {}", reply.status),
            });
        }
        let parsed: TokenReply = reply.json()?;
        let expires_in = json_scalar(&parsed.expires_in)
            .and_then(|v| v.parse::<u64>().ok())
            .ok_or_else(|| PaymentError::ProviderAuthError {
                provider: ProviderName::AirtelMoney,
                message: "token response has no usable expires_in".to_string(),
            })?;
        Ok(ProviderCredential::new(
            parsed.access_token,
            Duration::from_secs(expires_in),
        ))
    }
}

pub struct AirtelProvider {
    config: AirtelConfig,
    deps: ProviderDeps,
    rules: RailRules,
    tokens: AirtelTokenSource,
    base_url: String,
}

impl AirtelProvider {
    pub fn new(config: AirtelConfig, deps: ProviderDeps) -> Result<Self, ConfigError> {
        let rules = rail_rules(&config.country).ok_or_else(|| {
            ConfigError::InvalidValue(format!(
                "AIRTEL_COUNTRY {} is not an Airtel Money market",
                config.country
            ))
        })?;
        let base_url = config.base_url();
        let tokens = AirtelTokenSource {
            http: deps.http.clone(),
            base_url: base_url.clone(),
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
        };
        Ok(Self {
            config,
            deps,
            rules,
            tokens,
            base_url,
        })
    }

    async fn access_token(&self) -> PaymentResult<String> {
        with_retry(&self.deps.retry, || self.deps.tokens.get_token(&self.tokens)).await
    }

    async fn authorized(&self, method: Method, path: &str) -> PaymentResult<RequestBuilder> {
        let token = self.access_token().await?;
        Ok(self
            .deps
            .http
            .request(method, &format!("{}{}", self.base_url, path))
            .bearer_auth(token)
            .header("X-Country", self.config.country.as_str())
            .header("X-Currency", self.rules.currency.as_str()))
    }

    async fn send(&self, request: RequestBuilder) -> PaymentResult<HttpReply> {
        let reply = self.deps.http.send(ProviderName::AirtelMoney, request).await?;
        if reply.status == 401 {
            self.deps
                .tokens
                .invalidate(ProviderName::AirtelMoney, &self.config.client_id)
                .await;
        }
        reply.ok()
    }

    /// Airtel expects the subscriber number without the country prefix.
    fn local_msisdn<'a>(&self, msisdn: &'a str) -> &'a str {
        msisdn
            .strip_prefix(self.rules.calling_code.as_str())
            .unwrap_or(msisdn)
    }

    async fn query_once(&self, transaction_id: &str) -> PaymentResult<StatusResponse> {
        let request = self
            .authorized(Method::GET, &format!("/standard/v1/payments/{}", transaction_id))
            .await?;
        let parsed: JsonValue = self.send(request).await?.json()?;
        let transaction = parsed.get("data").and_then(|d| d.get("transaction"));
        let code = transaction
            .and_then(|t| t.get("status"))
            .and_then(json_scalar);
        Ok(StatusResponse {
            provider: ProviderName::AirtelMoney,
            provider_reference: transaction_id.to_string(),
            status: status_from_code(code.as_deref()),
            result_code: code,
            description: transaction
                .and_then(|t| t.get("message"))
                .and_then(json_scalar),
        })
    }
}

pub fn rail_rules(country: &str) -> Option<RailRules> {
    let (currency, calling_code) = country_details(country)?;
    Some(RailRules {
        provider: ProviderName::AirtelMoney,
        currency: currency.to_string(),
        calling_code: calling_code.to_string(),
        collection_limits: LIMITS,
        disbursement_limits: LIMITS,
        reference_max_len: REFERENCE_MAX_LEN,
        description_max_len: REFERENCE_MAX_LEN,
    })
}

/// `TS` succeeds, `TIP`/`TA` or no code at all stay pending, and every other
/// code (`TF`, `TE` and anything unrecognised) is a definitive failure.
fn status_from_code(code: Option<&str>) -> PaymentStatus {
    match code.map(str::trim).filter(|c| !c.is_empty()) {
        None | Some(STATUS_IN_PROGRESS) | Some(STATUS_AMBIGUOUS) => PaymentStatus::Pending,
        Some(STATUS_SUCCESS) => PaymentStatus::Succeeded,
        Some(_) => PaymentStatus::Failed,
    }
}

/// `status.result_code` and `status.message` of an Airtel response envelope.
fn envelope_status(parsed: &JsonValue) -> (Option<String>, Option<String>) {
    let status = parsed.get("status");
    (
        status.and_then(|s| s.get("result_code")).and_then(json_scalar),
        status.and_then(|s| s.get("message")).and_then(json_scalar),
    )
}

fn rejected(code: Option<String>, message: Option<String>) -> PaymentError {
    PaymentError::ProviderError {
        provider: ProviderName::AirtelMoney,
        message: message.unwrap_or_else(|| "request rejected".to_string()),
        provider_code: code,
        retryable: false,
    }
}

#[async_trait]
impl PaymentProvider for AirtelProvider {
    fn name(&self) -> ProviderName {
        ProviderName::AirtelMoney
    }

    fn currency(&self) -> &str {
        &self.rules.currency
    }

    fn validate_collection(&self, request: &CollectionRequest) -> PaymentResult<PreparedCollection> {
        self.rules.prepare_collection(request)
    }

    async fn initiate_collection(&self, request: CollectionRequest) -> PaymentResult<PaymentResponse> {
        let prepared = self.validate_collection(&request)?;
        let body = serde_json::json!({
            "reference": prepared.description,
            "subscriber": {
                "country": self.config.country,
                "currency": self.rules.currency,
                "msisdn": self.local_msisdn(&prepared.msisdn),
            },
            "transaction": {
                "amount": prepared.amount_major,
                "country": self.config.country,
                "currency": self.rules.currency,
                "id": prepared.reference,
            },
        });

        debug!(
            provider = %ProviderName::AirtelMoney,
            correlation_id = %prepared.reference,
            "sending ussd push"
        );
        let sent = match self.authorized(Method::POST, "/merchant/v1/payments/").await {
            Ok(request) => self.send(request.json(&body)).await,
            Err(e) => Err(e),
        };
        let reply = match sent {
            Ok(reply) => reply,
            Err(e) => {
                warn!(
                    provider = %ProviderName::AirtelMoney,
                    correlation_id = %prepared.reference,
                    error_code = e.code(),
                    "collection request failed"
                );
                return Err(e);
            }
        };

        let parsed: JsonValue = reply.json()?;
        let (result_code, message) = envelope_status(&parsed);
        if result_code.as_deref() != Some(STATUS_SUCCESS) {
            warn!(
                provider = %ProviderName::AirtelMoney,
                correlation_id = %prepared.reference,
                result_code = ?result_code,
                "collection request rejected"
            );
            return Err(rejected(result_code, message));
        }

        let transaction_id = parsed
            .get("data")
            .and_then(|d| d.get("transaction"))
            .and_then(|t| t.get("id"))
            .and_then(json_scalar)
            .unwrap_or_else(|| prepared.reference.clone());
        info!(
            provider = %ProviderName::AirtelMoney,
            correlation_id = %transaction_id,
            amount = prepared.amount_major,
            "ussd push initiated"
        );
        Ok(PaymentResponse {
            provider: ProviderName::AirtelMoney,
            status: PaymentStatus::Pending,
            provider_reference: transaction_id,
            secondary_reference: None,
            reference: prepared.reference,
            customer_message: message,
        })
    }

    async fn initiate_disbursement(
        &self,
        request: DisbursementRequest,
    ) -> PaymentResult<PaymentResponse> {
        let prepared = self.rules.prepare_disbursement(&request, REFERENCE_MAX_LEN)?;
        let pin = request
            .security_credential
            .clone()
            .or_else(|| self.config.disbursement_pin.clone())
            .ok_or_else(|| {
                PaymentError::validation(
                    ProviderName::AirtelMoney,
                    "disbursement PIN is not configured",
                    "security_credential",
                )
            })?;
        let body = serde_json::json!({
            "payee": { "msisdn": self.local_msisdn(&prepared.msisdn) },
            "reference": prepared.remarks,
            "pin": pin,
            "transaction": {
                "amount": prepared.amount_major,
                "id": prepared.reference,
            },
        });

        let sent = match self
            .authorized(Method::POST, "/standard/v1/disbursements/")
            .await
        {
            Ok(request) => self.send(request.json(&body)).await,
            Err(e) => Err(e),
        };
        let reply = match sent {
            Ok(reply) => reply,
            Err(e) => {
                warn!(
                    provider = %ProviderName::AirtelMoney,
                    correlation_id = %prepared.reference,
                    error_code = e.code(),
                    "disbursement request failed"
                );
                return Err(e);
            }
        };

        let parsed: JsonValue = reply.json()?;
        let (result_code, message) = envelope_status(&parsed);
        let transaction = parsed.get("data").and_then(|d| d.get("transaction"));
        let transaction_status = transaction.and_then(|t| t.get("status")).and_then(json_scalar);
        let accepted = result_code.as_deref() == Some(STATUS_SUCCESS)
            || matches!(
                transaction_status.as_deref(),
                Some(STATUS_SUCCESS) | Some(STATUS_IN_PROGRESS) | Some(STATUS_AMBIGUOUS)
            );
        if !accepted {
            warn!(
                provider = %ProviderName::AirtelMoney,
                correlation_id = %prepared.reference,
                result_code = ?result_code,
                "disbursement rejected"
            );
            return Err(rejected(result_code, message));
        }

        info!(
            provider = %ProviderName::AirtelMoney,
            correlation_id = %prepared.reference,
            amount = prepared.amount_major,
            "disbursement accepted"
        );
        Ok(PaymentResponse {
            provider: ProviderName::AirtelMoney,
            status: PaymentStatus::Pending,
            provider_reference: prepared.reference.clone(),
            secondary_reference: transaction
                .and_then(|t| t.get("reference_id").or_else(|| t.get("airtel_money_id")))
                .and_then(json_scalar),
            reference: prepared.reference,
            customer_message: message,
        })
    }

    async fn query_status(&self, provider_reference: &str) -> PaymentResult<StatusResponse> {
        if provider_reference.trim().is_empty() {
            return Err(PaymentError::validation(
                ProviderName::AirtelMoney,
                "transaction id is required",
                "provider_reference",
            ));
        }
        let status = with_retry(&self.deps.retry, || self.query_once(provider_reference)).await?;
        info!(
            provider = %ProviderName::AirtelMoney,
            correlation_id = %provider_reference,
            status = ?status.status,
            "payment status queried"
        );
        Ok(status)
    }

    fn supports_disbursement(&self) -> bool {
        true
    }

    fn supports_status_query(&self) -> bool {
        true
    }

    fn verify_callback(&self, payload: &[u8], signature: Option<&str>) -> PaymentResult<()> {
        callback::require_valid_signature(
            ProviderName::AirtelMoney,
            payload,
            signature,
            self.config.callback_secret.as_deref(),
        )
    }

    fn parse_callback(&self, payload: &[u8]) -> PaymentResult<CallbackEvent> {
        parse_callback_payload(payload)
    }
}

/// Parses `{"transaction": {"id", "message", "status_code", "airtel_money_id"}}`.
pub fn parse_callback_payload(payload: &[u8]) -> PaymentResult<CallbackEvent> {
    let parsed: JsonValue = serde_json::from_slice(payload).map_err(|e| {
        PaymentError::callback(
            ProviderName::AirtelMoney,
            format!("invalid callback JSON: {}", e),
        )
    })?;
    let transaction = parsed.get("transaction").ok_or_else(|| {
        PaymentError::callback(ProviderName::AirtelMoney, "callback has no transaction")
    })?;
    let id = transaction.get("id").and_then(json_scalar).ok_or_else(|| {
        PaymentError::callback(ProviderName::AirtelMoney, "callback has no transaction id")
    })?;
    let code = transaction.get("status_code").and_then(json_scalar);

    Ok(CallbackEvent {
        provider: ProviderName::AirtelMoney,
        kind: CallbackKind::Collection,
        provider_transaction_id: id.clone(),
        reference: Some(id),
        status: status_from_code(code.as_deref()),
        amount: None,
        receipt_number: transaction.get("airtel_money_id").and_then(json_scalar),
        payer_phone: None,
        transaction_date: None,
        result_code: code,
        result_description: transaction.get("message").and_then(json_scalar),
        raw_payload: String::from_utf8_lossy(payload).into_owned(),
        received_at: Utc::now(),
    })
}
