pub mod provider;
pub mod resilient;
pub mod validation;

pub use provider::{EmbeddingProvider, ProviderError, RerankerProvider};
pub use resilient::{
  ResilientEmbeddingProvider, ResilientRerankerProvider, RetryConfig, retry_with_backoff,
};
pub use validation::{TextValidationConfig, ValidationResult, validate_and_truncate};
