//! Errors for loading the node configuration.

use std::{io, path::PathBuf};

use concord_key_deriv::DerivationError;
use thiserror::Error;

/// Error while loading or validating the configuration.
#[derive(Debug, Error)]
pub enum ParamsError {
    /// The configuration file could not be read.
    #[error("failed to read config file {path}: {source}")]
    Io {
        /// File that was read.
        path: PathBuf,
        /// Underlying error.
        source: io::Error,
    },

    /// The file is not valid TOML or has fields of the wrong type.
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// The values parse but do not make sense together.
    #[error("invalid account layout: {0}")]
    Accounts(#[from] DerivationError),
}

/// Result alias for configuration loading.
pub type ParamsResult<T> = Result<T, ParamsError>;
