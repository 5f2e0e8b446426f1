use crate::payments::error::{PaymentError, PaymentResult};
use crate::payments::types::ProviderName;
use crate::payments::xml;
use reqwest::{Client, Method, RequestBuilder};
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use std::time::Duration;

/// Thin wrapper over `reqwest` that turns transport and HTTP failures into
/// provider-tagged [`PaymentError`]s. It never retries on its own; callers
/// decide whether an operation is safe to repeat.
#[derive(Clone)]
pub struct PaymentHttpClient {
    client: Client,
}

impl PaymentHttpClient {
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }

    pub fn request(&self, method: Method, url: &str) -> RequestBuilder {
        self.client.request(method, url)
    }

    pub async fn send(
        &self,
        provider: ProviderName,
        request: RequestBuilder,
    ) -> PaymentResult<HttpReply> {
        let response = request
            .send()
            .await
            .map_err(|e| PaymentError::NetworkError {
                provider,
                message: format!("provider request failed: {}", e),
            })?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| PaymentError::NetworkError {
                provider,
                message: format!("failed to read provider response: {}", e),
            })?;
        Ok(HttpReply {
            provider,
            status,
            body,
        })
    }
}

#[derive(Debug, Clone)]
pub struct HttpReply {
    pub provider: ProviderName,
    pub status: u16,
    pub body: String,
}

impl HttpReply {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn json<T: DeserializeOwned>(&self) -> PaymentResult<T> {
        serde_json::from_str::<T>(&self.body).map_err(|e| PaymentError::ProviderError {
            provider: self.provider,
            message: format!("invalid provider JSON response: {}", e),
            provider_code: None,
            retryable: false,
        })
    }

    /// Returns the reply if it is 2xx, otherwise the mapped error.
    pub fn ok(self) -> PaymentResult<Self> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(self.into_error())
        }
    }

    pub fn into_error(self) -> PaymentError {
        let (code, description) = provider_error_details(&self.body);
        let message = match description {
            Some(description) => format!("HTTP {}: {}", self.status, description),
            None => format!("HTTP {}", self.status),
        };
        match self.status {
            401 | 403 => PaymentError::ProviderAuthError {
                provider: self.provider,
                message,
            },
            429 => PaymentError::RateLimitError {
                provider: self.provider,
                message,
            },
            status => PaymentError::ProviderError {
                provider: self.provider,
                message,
                provider_code: code.or_else(|| Some(status.to_string())),
                retryable: status >= 500,
            },
        }
    }
}

/// Pulls the provider's own error code and description out of the common
/// error envelopes (Daraja, OAuth2, Airtel `status`, XML `<MESSAGE>`).
pub fn provider_error_details(body: &str) -> (Option<String>, Option<String>) {
    if let Ok(parsed) = serde_json::from_str::<JsonValue>(body) {
        let text = |v: &JsonValue, key: &str| v.get(key).and_then(json_scalar);
        let code = text(&parsed, "errorCode")
            .or_else(|| text(&parsed, "error"))
            .or_else(|| parsed.get("status").and_then(|s| text(s, "response_code")));
        let description = text(&parsed, "errorMessage")
            .or_else(|| text(&parsed, "error_description"))
            .or_else(|| parsed.get("status").and_then(|s| text(s, "message")))
            .or_else(|| text(&parsed, "message"));
        return (code, description);
    }
    (
        xml::extract_tag(body, "ERRORCODE"),
        xml::extract_tag(body, "MESSAGE"),
    )
}

/// String or number rendered as text; providers disagree on which they send.
pub fn json_scalar(value: &JsonValue) -> Option<String> {
    match value {
        JsonValue::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        JsonValue::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

pub fn hmac_sha256_hex(payload: &[u8], secret: &str) -> String {
    use hmac::{Hmac, Mac};
    use sha2::Sha256;

    type HmacSha256 = Hmac<Sha256>;
    // HMAC accepts keys of any length, so construction cannot fail.
    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(v) => v,
        Err(_) => return String::new(),
    };
    mac.update(payload);
    hex::encode(mac.finalize().into_bytes())
}

pub fn secure_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter()
        .zip(b.iter())
        .fold(0_u8, |acc, (x, y)| acc | (x ^ y))
        == 0
}
