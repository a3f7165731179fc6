/// Error types for the event notifier
pub mod error;

/// Event record data model
pub mod events;

/// Wall-clock abstraction
pub mod clock;

/// Configuration management
pub mod config;

/// Atomic JSON state files
pub mod storage;

/// Messaging provider client and test double
pub mod provider;

/// Cached provider access credential
pub mod credentials;

/// Notification throttling and dispatch
pub mod alerts;

/// Event source collectors
pub mod collectors;

/// Filter, throttle and dispatch pipeline for incoming events
pub mod intake;

// Re-export commonly used types
pub use error::{
    ConfigError, CredentialError, DispatchError, IntakeError, PersistenceError, ProviderError,
    SourceError,
};
pub use events::EventRecord;
pub use intake::{EventIntake, IntakeOutcome};
