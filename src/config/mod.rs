/// Configuration file model and loading
pub mod settings;

/// Masking of secrets for startup diagnostics
pub mod masking;

pub use masking::mask_value;
pub use settings::{
    Config, ProviderConfig, SourceConfig, StateConfig, ThrottleConfig, WeChatConfig,
};
