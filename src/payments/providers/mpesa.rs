use crate::config::{optional_var, required_var, ConfigError, Environment};
use crate::payments::callback;
use crate::payments::error::{PaymentError, PaymentResult};
use crate::payments::provider::{PaymentProvider, ProviderDeps};
use crate::payments::retry::with_retry;
use crate::payments::token_cache::{ProviderCredential, TokenSource};
use crate::payments::types::{
    CallbackEvent, CallbackKind, CollectionRequest, DisbursementRequest, Money, PaymentResponse,
    PaymentStatus, ProviderName, StatusResponse,
};
use crate::payments::utils::{json_scalar, provider_error_details, HttpReply, PaymentHttpClient};
use crate::payments::validation::{AmountLimits, PreparedCollection, RailRules};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::{DateTime, FixedOffset, Utc};
use reqwest::Method;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use std::fmt;
use std::time::Duration;
use tracing::{debug, info, warn};

pub const SANDBOX_BASE_URL: &str = "https://sandbox.safaricom.co.ke";
pub const PRODUCTION_BASE_URL: &str = "https://api.safaricom.co.ke";

const CURRENCY: &str = "KES";
const CALLING_CODE: &str = "254";
const REFERENCE_MAX_LEN: usize = 12;
const DESCRIPTION_MAX_LEN: usize = 13;
const REMARKS_MAX_LEN: usize = 100;
const COLLECTION_LIMITS: AmountLimits = AmountLimits::new(1, 150_000);
const DISBURSEMENT_LIMITS: AmountLimits = AmountLimits::new(10, 150_000);

/// Daraja timestamps are East Africa Time (UTC+3).
const EAT_OFFSET_SECS: i32 = 3 * 3600;
const TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M%S";

const RESULT_SUCCESS: &str = "0";
const RESULT_CANCELLED_BY_USER: &str = "1032";
/// Returned by the STK query while the payer has not yet answered the prompt.
const QUERY_STILL_PROCESSING: &str = "500.001.1001";

#[derive(Clone)]
pub struct MpesaConfig {
    pub consumer_key: String,
    pub consumer_secret: String,
    pub business_short_code: String,
    pub passkey: String,
    pub callback_url: String,
    /// B2C paying short code; falls back to `business_short_code`.
    pub b2c_short_code: Option<String>,
    pub initiator_name: Option<String>,
    pub security_credential: Option<String>,
    pub b2c_result_url: Option<String>,
    pub b2c_timeout_url: Option<String>,
    pub callback_secret: Option<String>,
    pub environment: Environment,
    pub base_url: Option<String>,
}

impl MpesaConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            consumer_key: required_var("MPESA_CONSUMER_KEY")?,
            consumer_secret: required_var("MPESA_CONSUMER_SECRET")?,
            business_short_code: required_var("MPESA_SHORTCODE")?,
            passkey: required_var("MPESA_PASSKEY")?,
            callback_url: required_var("MPESA_CALLBACK_URL")?,
            b2c_short_code: optional_var("MPESA_B2C_SHORTCODE"),
            initiator_name: optional_var("MPESA_INITIATOR_NAME"),
            security_credential: optional_var("MPESA_SECURITY_CREDENTIAL"),
            b2c_result_url: optional_var("MPESA_B2C_RESULT_URL"),
            b2c_timeout_url: optional_var("MPESA_B2C_TIMEOUT_URL"),
            callback_secret: optional_var("MPESA_CALLBACK_SECRET"),
            environment: Environment::from_env("MPESA_ENVIRONMENT")?,
            base_url: optional_var("MPESA_BASE_URL"),
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

impl fmt::Debug for MpesaConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MpesaConfig")
            .field("consumer_key", &self.consumer_key)
            .field("business_short_code", &self.business_short_code)
            .field("callback_url", &self.callback_url)
            .field("b2c_short_code", &self.b2c_short_code)
            .field("initiator_name", &self.initiator_name)
            .field("environment", &self.environment)
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

/// Daraja OAuth exchange (`GET /oauth/v1/generate`, HTTP Basic).
pub struct MpesaTokenSource {
    http: PaymentHttpClient,
    base_url: String,
    consumer_key: String,
    consumer_secret: String,
}

#[derive(Debug, Deserialize)]
struct TokenReply {
    access_token: String,
    /// Daraja sends this as a string ("3599").
    expires_in: JsonValue,
}

#[async_trait]
impl TokenSource for MpesaTokenSource {
    fn provider(&self) -> ProviderName {
        ProviderName::Mpesa
    }

    fn client_id(&self) -> &str {
        &self.consumer_key
    }

    async fn fetch_token(&self) -> PaymentResult<ProviderCredential> {
        let basic = BASE64.encode(format!("{}:{}", self.consumer_key, self.consumer_secret));
        let url = format!(
            "{}/oauth/v1/generate?grant_type=client_credentials",
            self.base_url
        );
        let request = self
            .http
            .request(Method::GET, &url)
            .header("Authorization", format!("Basic {}", basic));
        let reply = self.http.send(ProviderName::Mpesa, request).await?;
        if !reply.is_success() {
            return Err(PaymentError::ProviderAuthError {
                provider: ProviderName::Mpesa,
                message: format!("token exchange failed with HTTP {}", reply.status),
            });
        }
        let parsed: TokenReply = reply.json()?;
        let expires_in = json_scalar(&parsed.expires_in)
            .and_then(|v| v.parse::<u64>().ok())
            .ok_or_else(|| PaymentError::ProviderAuthError {
                provider: ProviderName::Mpesa,
                message: "token response has no usable expires_in".to_string(),
            })?;
        Ok(ProviderCredential::new(
            parsed.access_token,
            Duration::from_secs(expires_in),
        ))
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct StkPushReply {
    #[serde(rename = "MerchantRequestID")]
    merchant_request_id: String,
    #[serde(rename = "CheckoutRequestID")]
    checkout_request_id: String,
    response_code: String,
    response_description: Option<String>,
    customer_message: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct B2cReply {
    #[serde(rename = "ConversationID")]
    conversation_id: String,
    #[serde(rename = "OriginatorConversationID")]
    originator_conversation_id: String,
    response_code: String,
    response_description: Option<String>,
}

pub struct MpesaProvider {
    config: MpesaConfig,
    deps: ProviderDeps,
    rules: RailRules,
    tokens: MpesaTokenSource,
    base_url: String,
}

impl MpesaProvider {
    pub fn new(config: MpesaConfig, deps: ProviderDeps) -> Self {
        let base_url = config.base_url();
        let tokens = MpesaTokenSource {
            http: deps.http.clone(),
            base_url: base_url.clone(),
            consumer_key: config.consumer_key.clone(),
            consumer_secret: config.consumer_secret.clone(),
        };
        Self {
            rules: rail_rules(),
            config,
            deps,
            tokens,
            base_url,
        }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn access_token(&self) -> PaymentResult<String> {
        with_retry(&self.deps.retry, || self.deps.tokens.get_token(&self.tokens)).await
    }

    async fn post_json(&self, path: &str, body: &JsonValue) -> PaymentResult<HttpReply> {
        let token = self.access_token().await?;
        let request = self
            .deps
            .http
            .request(Method::POST, &self.endpoint(path))
            .bearer_auth(token)
            .json(body);
        let reply = self.deps.http.send(ProviderName::Mpesa, request).await?;
        if reply.status == 401 {
            self.deps
                .tokens
                .invalidate(ProviderName::Mpesa, &self.config.consumer_key)
                .await;
        }
        Ok(reply)
    }

    fn password(&self, timestamp: &str) -> String {
        stk_password(&self.config.business_short_code, &self.config.passkey, timestamp)
    }

    async fn query_once(&self, checkout_request_id: &str) -> PaymentResult<StatusResponse> {
        let timestamp = eat_timestamp(Utc::now());
        let body = serde_json::json!({
            "BusinessShortCode": self.config.business_short_code,
            "Password": self.password(&timestamp),
            "Timestamp": timestamp,
            "CheckoutRequestID": checkout_request_id,
        });
        let reply = self.post_json("/mpesa/stkpushquery/v1/query", &body).await?;

        if !reply.is_success() {
            let (code, description) = provider_error_details(&reply.body);
            if code.as_deref() == Some(QUERY_STILL_PROCESSING) {
                return Ok(StatusResponse {
                    provider: ProviderName::Mpesa,
                    provider_reference: checkout_request_id.to_string(),
                    status: PaymentStatus::Pending,
                    result_code: code,
                    description,
                });
            }
            return Err(reply.into_error());
        }

        let parsed: JsonValue = reply.json()?;
        let result_code = parsed.get("ResultCode").and_then(json_scalar);
        Ok(StatusResponse {
            provider: ProviderName::Mpesa,
            provider_reference: checkout_request_id.to_string(),
            status: status_from_result_code(result_code.as_deref()),
            result_code,
            description: parsed.get("ResultDesc").and_then(json_scalar),
        })
    }
}

pub fn rail_rules() -> RailRules {
    RailRules {
        provider: ProviderName::Mpesa,
        currency: CURRENCY.to_string(),
        calling_code: CALLING_CODE.to_string(),
        collection_limits: COLLECTION_LIMITS,
        disbursement_limits: DISBURSEMENT_LIMITS,
        reference_max_len: REFERENCE_MAX_LEN,
        description_max_len: DESCRIPTION_MAX_LEN,
    }
}

/// `YYYYMMDDHHmmss` in East Africa Time.
pub fn eat_timestamp(now: DateTime<Utc>) -> String {
    match FixedOffset::east_opt(EAT_OFFSET_SECS) {
        Some(eat) => now.with_timezone(&eat).format(TIMESTAMP_FORMAT).to_string(),
        None => now.format(TIMESTAMP_FORMAT).to_string(),
    }
}

/// Lipa na M-Pesa password: base64(short code + passkey + timestamp).
pub fn stk_password(short_code: &str, passkey: &str, timestamp: &str) -> String {
    BASE64.encode(format!("{}{}{}", short_code, passkey, timestamp))
}

fn status_from_result_code(code: Option<&str>) -> PaymentStatus {
    match code {
        None => PaymentStatus::Pending,
        Some(RESULT_SUCCESS) => PaymentStatus::Succeeded,
        Some(RESULT_CANCELLED_BY_USER) => PaymentStatus::Cancelled,
        Some(_) => PaymentStatus::Failed,
    }
}

fn rejected(code: String, description: Option<String>) -> PaymentError {
    PaymentError::ProviderError {
        provider: ProviderName::Mpesa,
        message: description.unwrap_or_else(|| "request rejected".to_string()),
        provider_code: Some(code),
        retryable: false,
    }
}

#[async_trait]
impl PaymentProvider for MpesaProvider {
    fn name(&self) -> ProviderName {
        ProviderName::Mpesa
    }

    fn currency(&self) -> &str {
        CURRENCY
    }

    fn validate_collection(&self, request: &CollectionRequest) -> PaymentResult<PreparedCollection> {
        self.rules.prepare_collection(request)
    }

    async fn initiate_collection(&self, request: CollectionRequest) -> PaymentResult<PaymentResponse> {
        let prepared = self.validate_collection(&request)?;
        let timestamp = eat_timestamp(Utc::now());
        let body = serde_json::json!({
            "BusinessShortCode": self.config.business_short_code,
            "Password": self.password(&timestamp),
            "Timestamp": timestamp,
            "TransactionType": "CustomerPayBillOnline",
            "Amount": prepared.amount_major,
            "PartyA": prepared.msisdn,
            "PartyB": self.config.business_short_code,
            "PhoneNumber": prepared.msisdn,
            "CallBackURL": self.config.callback_url,
            "AccountReference": prepared.reference,
            "TransactionDesc": prepared.description,
        });
        debug!(
            provider = %ProviderName::Mpesa,
            reference = %prepared.reference,
            "sending stk push"
        );

        let reply = match self
            .post_json("/mpesa/stkpush/v1/processrequest", &body)
            .await
            .and_then(HttpReply::ok)
        {
            Ok(reply) => reply,
            Err(e) => {
                warn!(
                    provider = %ProviderName::Mpesa,
                    reference = %prepared.reference,
                    error_code = e.code(),
                    "stk push failed"
                );
                return Err(e);
            }
        };
        let parsed: StkPushReply = reply.json()?;
        if parsed.response_code != RESULT_SUCCESS {
            warn!(
                provider = %ProviderName::Mpesa,
                correlation_id = %parsed.checkout_request_id,
                response_code = %parsed.response_code,
                "stk push rejected"
            );
            return Err(rejected(parsed.response_code, parsed.response_description));
        }

        info!(
            provider = %ProviderName::Mpesa,
            correlation_id = %parsed.checkout_request_id,
            reference = %prepared.reference,
            amount = prepared.amount_major,
            "stk push initiated"
        );
        Ok(PaymentResponse {
            provider: ProviderName::Mpesa,
            status: PaymentStatus::Pending,
            provider_reference: parsed.checkout_request_id,
            secondary_reference: Some(parsed.merchant_request_id),
            reference: prepared.reference,
            customer_message: parsed.customer_message,
        })
    }

    async fn initiate_disbursement(
        &self,
        request: DisbursementRequest,
    ) -> PaymentResult<PaymentResponse> {
        let prepared = self.rules.prepare_disbursement(&request, REMARKS_MAX_LEN)?;
        let initiator_name = request
            .initiator_name
            .clone()
            .or_else(|| self.config.initiator_name.clone())
            .ok_or_else(|| {
                PaymentError::validation(
                    ProviderName::Mpesa,
                    "B2C initiator name is not configured",
                    "initiator_name",
                )
            })?;
        let security_credential = request
            .security_credential
            .clone()
            .or_else(|| self.config.security_credential.clone())
            .ok_or_else(|| {
                PaymentError::validation(
                    ProviderName::Mpesa,
                    "B2C security credential is not configured",
                    "security_credential",
                )
            })?;
        let result_url = self.config.b2c_result_url.clone().ok_or_else(|| {
            PaymentError::validation(
                ProviderName::Mpesa,
                "B2C result URL is not configured",
                "b2c_result_url",
            )
        })?;
        let timeout_url = self
            .config
            .b2c_timeout_url
            .clone()
            .unwrap_or_else(|| result_url.clone());
        let short_code = self
            .config
            .b2c_short_code
            .as_deref()
            .unwrap_or(&self.config.business_short_code);

        let body = serde_json::json!({
            "OriginatorConversationID": uuid::Uuid::new_v4().to_string(),
            "InitiatorName": initiator_name,
            "SecurityCredential": security_credential,
            "CommandID": request.command.as_str(),
            "Amount": prepared.amount_major,
            "PartyA": short_code,
            "PartyB": prepared.msisdn,
            "Remarks": prepared.remarks,
            "QueueTimeOutURL": timeout_url,
            "ResultURL": result_url,
            "Occasion": prepared.occasion,
        });

        let reply = match self
            .post_json("/mpesa/b2c/v1/paymentrequest", &body)
            .await
            .and_then(HttpReply::ok)
        {
            Ok(reply) => reply,
            Err(e) => {
                warn!(
                    provider = %ProviderName::Mpesa,
                    reference = %prepared.reference,
                    error_code = e.code(),
                    "b2c payment failed"
                );
                return Err(e);
            }
        };
        let parsed: B2cReply = reply.json()?;
        if parsed.response_code != RESULT_SUCCESS {
            warn!(
                provider = %ProviderName::Mpesa,
                correlation_id = %parsed.conversation_id,
                response_code = %parsed.response_code,
                "b2c payment rejected"
            );
            return Err(rejected(parsed.response_code, parsed.response_description));
        }

        info!(
            provider = %ProviderName::Mpesa,
            correlation_id = %parsed.conversation_id,
            reference = %prepared.reference,
            amount = prepared.amount_major,
            "b2c payment accepted"
        );
        Ok(PaymentResponse {
            provider: ProviderName::Mpesa,
            status: PaymentStatus::Pending,
            provider_reference: parsed.conversation_id,
            secondary_reference: Some(parsed.originator_conversation_id),
            reference: prepared.reference,
            customer_message: parsed.response_description,
        })
    }

    async fn query_status(&self, provider_reference: &str) -> PaymentResult<StatusResponse> {
        if provider_reference.trim().is_empty() {
            return Err(PaymentError::validation(
                ProviderName::Mpesa,
                "CheckoutRequestID is required",
                "provider_reference",
            ));
        }
        let status = with_retry(&self.deps.retry, || self.query_once(provider_reference)).await?;
        info!(
            provider = %ProviderName::Mpesa,
            correlation_id = %provider_reference,
            status = ?status.status,
            "stk push status queried"
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
            ProviderName::Mpesa,
            payload,
            signature,
            self.config.callback_secret.as_deref(),
        )
    }

    fn parse_callback(&self, payload: &[u8]) -> PaymentResult<CallbackEvent> {
        parse_callback_payload(payload)
    }
}

/// Parses either an STK push callback or a B2C result notification.
pub fn parse_callback_payload(payload: &[u8]) -> PaymentResult<CallbackEvent> {
    let parsed: JsonValue = serde_json::from_slice(payload).map_err(|e| {
        PaymentError::callback(ProviderName::Mpesa, format!("invalid callback JSON: {}", e))
    })?;
    let raw_payload = String::from_utf8_lossy(payload).into_owned();

    if let Some(stk) = parsed.get("Body").and_then(|b| b.get("stkCallback")) {
        return parse_stk_callback(stk, raw_payload);
    }
    if let Some(result) = parsed.get("Result") {
        return parse_b2c_result(result, raw_payload);
    }
    Err(PaymentError::callback(
        ProviderName::Mpesa,
        "callback is neither an STK callback nor a B2C result",
    ))
}

fn parse_stk_callback(stk: &JsonValue, raw_payload: String) -> PaymentResult<CallbackEvent> {
    let checkout_request_id = stk
        .get("CheckoutRequestID")
        .and_then(json_scalar)
        .ok_or_else(|| {
            PaymentError::callback(ProviderName::Mpesa, "callback has no CheckoutRequestID")
        })?;
    let result_code = stk.get("ResultCode").and_then(json_scalar);
    let items = stk
        .get("CallbackMetadata")
        .and_then(|m| m.get("Item"))
        .and_then(JsonValue::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[]);
    let item = |name: &str| metadata_value(items, "Name", name);

    Ok(CallbackEvent {
        provider: ProviderName::Mpesa,
        kind: CallbackKind::Collection,
        provider_transaction_id: checkout_request_id,
        reference: stk.get("MerchantRequestID").and_then(json_scalar),
        status: status_from_result_code(result_code.as_deref()),
        amount: parse_amount(item("Amount"))?,
        receipt_number: item("MpesaReceiptNumber"),
        payer_phone: item("PhoneNumber"),
        transaction_date: item("TransactionDate"),
        result_code,
        result_description: stk.get("ResultDesc").and_then(json_scalar),
        raw_payload,
        received_at: Utc::now(),
    })
}

fn parse_b2c_result(result: &JsonValue, raw_payload: String) -> PaymentResult<CallbackEvent> {
    let conversation_id = result
        .get("ConversationID")
        .and_then(json_scalar)
        .ok_or_else(|| PaymentError::callback(ProviderName::Mpesa, "result has no ConversationID"))?;
    let result_code = result.get("ResultCode").and_then(json_scalar);
    let params = result
        .get("ResultParameters")
        .and_then(|p| p.get("ResultParameter"))
        .and_then(JsonValue::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[]);
    let param = |key: &str| metadata_value(params, "Key", key);

    // "254722000000 - Jane Doe"
    let recipient = param("ReceiverPartyPublicName").and_then(|v| {
        v.split(" - ")
            .next()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    });

    Ok(CallbackEvent {
        provider: ProviderName::Mpesa,
        kind: CallbackKind::Disbursement,
        provider_transaction_id: conversation_id,
        reference: result.get("OriginatorConversationID").and_then(json_scalar),
        status: status_from_result_code(result_code.as_deref()),
        amount: parse_amount(param("TransactionAmount"))?,
        receipt_number: param("TransactionReceipt")
            .or_else(|| result.get("TransactionID").and_then(json_scalar)),
        payer_phone: recipient,
        transaction_date: param("TransactionCompletedDateTime"),
        result_code,
        result_description: result.get("ResultDesc").and_then(json_scalar),
        raw_payload,
        received_at: Utc::now(),
    })
}

/// Scans `[{<name_key>: .., "Value": ..}]` for the first entry named `name`.
fn metadata_value(items: &[JsonValue], name_key: &str, name: &str) -> Option<String> {
    items
        .iter()
        .find(|item| item.get(name_key).and_then(JsonValue::as_str) == Some(name))
        .and_then(|item| item.get("Value"))
        .and_then(json_scalar)
}

fn parse_amount(value: Option<String>) -> PaymentResult<Option<Money>> {
    value
        .map(|v| {
            Money::from_major_str(&v, CURRENCY).map_err(|e| {
                PaymentError::callback(ProviderName::Mpesa, format!("invalid amount: {}", e))
            })
        })
        .transpose()
}
