use thiserror::Error;

/// Errors that can occur in the event source
#[derive(Error, Debug)]
pub enum SourceError {
    #[error("Failed to spawn event source: {0}")]
    SubprocessSpawn(String),

    #[error("Event source terminated unexpectedly: {0}")]
    SubprocessTerminated(String),

    #[error("Failed to parse event record: {0}")]
    ParseError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Errors reported by the remote messaging provider
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProviderError {
    #[error("HTTP request failed: {0}")]
    HttpError(String),

    #[error("Invalid response format: {0}")]
    InvalidResponse(String),

    #[error("Provider rejected the credential (errcode {code}): {body}")]
    CredentialExpired { code: i64, body: String },

    #[error("Provider rejected the request: {body}")]
    Rejected { body: String },
}

/// Errors that can occur while obtaining an access credential
#[derive(Error, Debug)]
pub enum CredentialError {
    #[error("Credential fetch failed: {0}")]
    FetchFailed(#[from] ProviderError),

    #[error("Provider returned no usable token: {0}")]
    MissingToken(String),
}

/// Errors that can occur when dispatching a notification
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("No credential available: {0}")]
    CredentialUnavailable(#[from] CredentialError),

    #[error("Provider rejected notification: {body}")]
    ProviderRejected { body: String },

    #[error("Provider call failed: {0}")]
    Transport(ProviderError),
}

/// Errors from reading or writing the on-disk state files
#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("IO error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Corrupt state file {path}: {source}")]
    Corrupt {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to serialize state: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Errors that abort the handling of a single event
#[derive(Error, Debug)]
pub enum IntakeError {
    #[error("Throttle ledger unavailable: {0}")]
    Ledger(#[from] PersistenceError),

    #[error("Dispatch failed: {0}")]
    Dispatch(#[from] DispatchError),

    #[error("Event task failed: {0}")]
    Task(String),
}

/// Errors that can occur during configuration loading
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(String),

    #[error("Failed to write default config: {0}")]
    WriteError(String),

    #[error("Invalid configuration value: {0}")]
    ValidationError(String),

    #[error("TOML parse error: {0}")]
    TomlError(#[from] toml::de::Error),
}

impl PersistenceError {
    pub(crate) fn io(path: &std::path::Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.display().to_string(),
            source,
        }
    }
}
