use crate::payments::error::{PaymentError, PaymentResult};
use crate::payments::retry::RetryPolicy;
use crate::payments::token_cache::TokenCache;
use crate::payments::types::{
    CallbackEvent, CollectionRequest, DisbursementRequest, PaymentResponse, ProviderName,
    StatusResponse,
};
use crate::payments::utils::PaymentHttpClient;
use crate::payments::validation::PreparedCollection;
use async_trait::async_trait;
use std::sync::Arc;

/// Uniform contract over the mobile-money rails.
#[async_trait]
pub trait PaymentProvider: Send + Sync {
    fn name(&self) -> ProviderName;

    /// The single currency this rail/country pairing accepts.
    fn currency(&self) -> &str;

    /// Validates and normalizes a collection without touching the network.
    fn validate_collection(&self, request: &CollectionRequest) -> PaymentResult<PreparedCollection>;

    /// Starts a collection (STK/USSD push). Always `Pending` on success.
    async fn initiate_collection(&self, request: CollectionRequest) -> PaymentResult<PaymentResponse>;

    async fn initiate_disbursement(
        &self,
        _request: DisbursementRequest,
    ) -> PaymentResult<PaymentResponse> {
        Err(PaymentError::Unsupported {
            provider: self.name(),
            operation: "disbursement",
        })
    }

    async fn query_status(&self, _provider_reference: &str) -> PaymentResult<StatusResponse> {
        Err(PaymentError::Unsupported {
            provider: self.name(),
            operation: "status query",
        })
    }

    fn supports_disbursement(&self) -> bool {
        false
    }

    fn supports_status_query(&self) -> bool {
        false
    }

    /// Checks the webhook signature over the raw, unparsed body.
    fn verify_callback(&self, payload: &[u8], signature: Option<&str>) -> PaymentResult<()>;

    /// Translates a webhook body into a [`CallbackEvent`]. Pure.
    fn parse_callback(&self, payload: &[u8]) -> PaymentResult<CallbackEvent>;
}

/// Collaborators every adapter needs, built once and shared.
#[derive(Clone)]
pub struct ProviderDeps {
    pub http: PaymentHttpClient,
    pub tokens: Arc<TokenCache>,
    pub retry: RetryPolicy,
}

impl ProviderDeps {
    pub fn new(http: PaymentHttpClient, tokens: Arc<TokenCache>, retry: RetryPolicy) -> Self {
        Self {
            http,
            tokens,
            retry,
        }
    }
}
