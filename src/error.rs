//! Top-level gateway error.

use thiserror::Error;

use crate::config::ConfigError;
use crate::correlation::ExportError;
use crate::security::rules::RuleError;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("rule set error: {0}")]
    Rules(#[from] RuleError),

    #[error("export sink error: {0}")]
    Export(#[from] ExportError),

    #[error("invalid upstream address '{0}'")]
    Upstream(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
