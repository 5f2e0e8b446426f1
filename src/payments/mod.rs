//! Mobile-money rails: provider adapters and the machinery they share.

pub mod callback;
pub mod error;
pub mod factory;
pub mod provider;
pub mod providers;
pub mod retry;
pub mod token_cache;
pub mod types;
pub mod utils;
pub mod validation;
pub mod xml;

pub use error::{PaymentError, PaymentResult};
pub use factory::{PaymentRegistryConfig, ProviderRegistry};
pub use provider::{PaymentProvider, ProviderDeps};
pub use types::{
    CallbackEvent, CallbackKind, CollectionRequest, DisbursementRequest, Money, PaymentResponse,
    PaymentStatus, ProviderName, StatusResponse,
};
