use crate::config::{AppConfig, ConfigError};
use crate::payments::error::{PaymentError, PaymentResult};
use crate::payments::provider::{PaymentProvider, ProviderDeps};
use crate::payments::providers::{
    AirtelConfig, AirtelProvider, MpesaConfig, MpesaProvider, TigoConfig, TigoProvider,
};
use crate::payments::token_cache::TokenCache;
use crate::payments::types::{CallbackEvent, ProviderName};
use crate::payments::utils::PaymentHttpClient;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentRegistryConfig {
    pub enabled_providers: Vec<ProviderName>,
}

impl PaymentRegistryConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let enabled_raw = std::env::var("ENABLED_PAYMENT_PROVIDERS")
            .unwrap_or_else(|_| "mpesa,airtel_money,tigo_pesa".to_string());
        Self::parse(&enabled_raw)
    }

    pub fn parse(enabled_raw: &str) -> Result<Self, ConfigError> {
        let mut enabled_providers = Vec::new();
        for part in enabled_raw.split(',') {
            let value = part.trim();
            if value.is_empty() {
                continue;
            }
            let provider = ProviderName::from_str(value)
                .map_err(|e| ConfigError::InvalidValue(format!("ENABLED_PAYMENT_PROVIDERS: {}", e)))?;
            if !enabled_providers.contains(&provider) {
                enabled_providers.push(provider);
            }
        }
        Ok(Self { enabled_providers })
    }
}

/// Dispatch table from rail name to adapter.
#[derive(Default)]
pub struct ProviderRegistry {
    providers: HashMap<ProviderName, Arc<dyn PaymentProvider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds shared collaborators from `app` and every enabled adapter from
    /// its `MPESA_*` / `AIRTEL_*` / `TIGO_*` environment.
    pub fn from_env(app: &AppConfig) -> Result<Self, ConfigError> {
        let registry_config = PaymentRegistryConfig::from_env()?;
        let http = PaymentHttpClient::new(app.http.timeout()).map_err(|e| {
            ConfigError::ValidationFailed(format!("failed to build HTTP client: {}", e))
        })?;
        let deps = ProviderDeps::new(
            http,
            Arc::new(TokenCache::new(app.token_cache.safety_margin())),
            app.retry.policy(),
        );

        let mut registry = Self::new();
        for provider in &registry_config.enabled_providers {
            match provider {
                ProviderName::Mpesa => registry.register(Arc::new(MpesaProvider::new(
                    MpesaConfig::from_env()?,
                    deps.clone(),
                ))),
                ProviderName::AirtelMoney => registry.register(Arc::new(AirtelProvider::new(
                    AirtelConfig::from_env()?,
                    deps.clone(),
                )?)),
                ProviderName::TigoPesa => registry.register(Arc::new(TigoProvider::new(
                    TigoConfig::from_env()?,
                    deps.clone(),
                ))),
            }
        }
        info!(providers = ?registry.list(), "payment providers registered");
        Ok(registry)
    }

    /// Adds or replaces the adapter for `provider.name()`.
    pub fn register(&mut self, provider: Arc<dyn PaymentProvider>) {
        self.providers.insert(provider.name(), provider);
    }

    pub fn get(&self, provider: ProviderName) -> PaymentResult<Arc<dyn PaymentProvider>> {
        self.providers
            .get(&provider)
            .cloned()
            .ok_or_else(|| PaymentError::ValidationError {
                provider,
                message: format!("provider {} is not enabled", provider),
                field: Some("provider".to_string()),
            })
    }

    pub fn list(&self) -> Vec<ProviderName> {
        let mut names: Vec<ProviderName> = self.providers.keys().copied().collect();
        names.sort();
        names
    }

    /// Verifies, then parses an inbound webhook. Nothing is applied here; the
    /// caller persists the event and moves the payment via
    /// [`PaymentStatus::transition_to`](crate::payments::types::PaymentStatus::transition_to).
    pub fn process_callback(
        &self,
        provider: ProviderName,
        payload: &[u8],
        signature: Option<&str>,
    ) -> PaymentResult<CallbackEvent> {
        let adapter = self.get(provider)?;
        if let Err(e) = adapter.verify_callback(payload, signature) {
            warn!(
                provider = %provider,
                error_code = e.code(),
                http_status = e.http_status_code(),
                "callback rejected"
            );
            return Err(e);
        }
        match adapter.parse_callback(payload) {
            Ok(event) => {
                info!(
                    provider = %provider,
                    correlation_id = %event.provider_transaction_id,
                    status = ?event.status,
                    kind = ?event.kind,
                    "callback accepted"
                );
                Ok(event)
            }
            Err(e) => {
                warn!(
                    provider = %provider,
                    error_code = e.code(),
                    http_status = e.http_status_code(),
                    "callback could not be parsed"
                );
                Err(e)
            }
        }
    }
}
