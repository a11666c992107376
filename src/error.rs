use std::fmt::Display;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("character `{0}` is already registered")]
    DuplicateName(String),
    #[error("invalid character name `{0}`: only letters, digits, underscores and spaces are allowed")]
    InvalidName(String),
    #[error("registration is closed, `{0}` must be registered before sessions start")]
    RegistrationClosed(String),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HookError {
    #[error("{0}")]
    Failed(String),
    #[error("hook panicked: {0}")]
    Panicked(String),
}

impl HookError {
    pub fn msg(message: impl Display) -> Self {
        Self::Failed(message.to_string())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("save store i/o failed for {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}
