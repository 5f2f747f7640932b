//! Error types shared by every stage of the compiler.
//!
//! Model operations, encoders and the orchestrator all return [`Result`]. The encoders never
//! recover from an error themselves: the first failure aborts a compilation and no partial
//! artifact is produced. The memory estimate path is the only place where errors are swallowed
//! (see [`crate::memory::MemoryStatus`]).

use std::io;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// A Step, Program, LED type or plate configuration is in an invalid state.
    #[error("{entity} is invalid: {}", .reasons.join(" "))]
    Validation {
        entity: String,
        reasons: Vec<String>,
    },

    /// Invalid entities are referenced by the plate and would be exported.
    #[error("cannot export, invalid entities in use: {}", .0.join(", "))]
    ExportValidation(Vec<String>),

    /// The value does not fit into an unsigned 32 bit field.
    #[error("value {0} cannot be encoded, it must lie within 0..2^32")]
    EncodingRange(i128),

    #[error("no free ID left in {floor}..={ceiling}")]
    AllocatorExhausted { floor: u32, ceiling: u32 },

    #[error("cannot read template {path:?}: {source}")]
    TemplateIo {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Save data is well-formed JSON but inconsistent (ID mismatch, dangling reference, ...).
    #[error("malformed save data: {0}")]
    Session(String),

    #[error("invalid template marker pattern: {0}")]
    Pattern(#[from] regex::Error),

    #[error("cannot parse save file: {0}")]
    SaveFormat(#[from] serde_json::Error),

    #[error("invalid configuration: {0}")]
    Config(#[from] toml::de::Error),

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: u32 },
}

impl Error {
    pub(crate) fn validation(entity: impl Into<String>, reasons: Vec<String>) -> Self {
        Error::Validation {
            entity: entity.into(),
            reasons,
        }
    }

    pub(crate) fn session(msg: impl Into<String>) -> Self {
        Error::Session(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(feature = "python")]
impl From<Error> for pyo3::PyErr {
    fn from(err: Error) -> Self {
        pyo3::exceptions::PyValueError::new_err(err.to_string())
    }
}
