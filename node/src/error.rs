//All pool node specific errors are defined here
use std::fmt;
use std::path::PathBuf;

use tokio_util::codec::LinesCodecError;

#[derive(Debug)]
//Errors surfaced by the stratum codec, connections and the listening server
pub enum StratumErrors {
    MalformedMessage {
        error: String,
    },
    EncodeFailed {
        error: serde_json::Error,
    },
    UnableToReadStream {
        error: LinesCodecError,
    },
    UnableToWriteStream {
        error: std::io::Error,
    },
    OutboundQueueFull {
        depth: usize,
    },
    ConnectionClosed,
    CallTimeout {
        method: String,
        id: u64,
    },
    CallFailed {
        message: String,
    },
    ParamNotFound {
        param: String,
        method: String,
    },
    InvalidMethodParams {
        method: String,
    },
    InvalidMethod {
        method: String,
    },
    BindFailed {
        address: String,
        error: std::io::Error,
    },
    AcceptFailed {
        error: std::io::Error,
    },
}

impl fmt::Display for StratumErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StratumErrors::MalformedMessage { error } => {
                write!(f, "Malformed stratum message: {}", error)
            }
            StratumErrors::EncodeFailed { error } => {
                write!(f, "Stratum message could not be encoded: {}", error)
            }
            StratumErrors::UnableToReadStream { error } => {
                write!(f, "An error occurred while reading from the stream - {}", error)
            }
            StratumErrors::UnableToWriteStream { error } => {
                write!(f, "An error occurred while writing to the stream - {}", error)
            }
            StratumErrors::OutboundQueueFull { depth } => {
                write!(f, "Peer is not reading, {} frames already queued", depth)
            }
            StratumErrors::ConnectionClosed => write!(f, "Connection closed"),
            StratumErrors::CallTimeout { method, id } => {
                write!(f, "Timeout waiting for a response to {} (id {})", method, id)
            }
            StratumErrors::CallFailed { message } => {
                write!(f, "Remote returned an error: {}", message)
            }
            StratumErrors::ParamNotFound { param, method } => {
                write!(f, "Parameter {} not found for method {}", param, method)
            }
            StratumErrors::InvalidMethodParams { method } => {
                write!(f, "Invalid parameters supplied to {}", method)
            }
            StratumErrors::InvalidMethod { method } => {
                write!(f, "Unknown stratum method {}", method)
            }
            StratumErrors::BindFailed { address, error } => {
                write!(f, "Failed to bind to {}: {}", address, error)
            }
            StratumErrors::AcceptFailed { error } => {
                write!(f, "Failed to accept an incoming connection: {}", error)
            }
        }
    }
}

impl std::error::Error for StratumErrors {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StratumErrors::EncodeFailed { error } => Some(error),
            StratumErrors::UnableToReadStream { error } => Some(error),
            StratumErrors::UnableToWriteStream { error } => Some(error),
            StratumErrors::BindFailed { error, .. } => Some(error),
            StratumErrors::AcceptFailed { error } => Some(error),
            _ => None,
        }
    }
}

#[derive(Debug)]
pub enum ConfigError {
    Io {
        path: PathBuf,
        error: std::io::Error,
    },
    Parse {
        path: PathBuf,
        error: toml::de::Error,
    },
    PathExpansion {
        path: String,
    },
    InvalidBindAddress {
        address: String,
    },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Io { path, error } => {
                write!(f, "Could not read config file {}: {}", path.display(), error)
            }
            ConfigError::Parse { path, error } => {
                write!(f, "Could not parse config file {}: {}", path.display(), error)
            }
            ConfigError::PathExpansion { path } => {
                write!(f, "Could not expand config path {}", path)
            }
            ConfigError::InvalidBindAddress { address } => {
                write!(f, "Invalid bind address {}, expected [host]:port", address)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShareChainError {
    SubmissionUnsupported,
}

impl fmt::Display for ShareChainError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShareChainError::SubmissionUnsupported => {
                write!(f, "The share chain does not accept header submissions yet")
            }
        }
    }
}

impl std::error::Error for ShareChainError {}
