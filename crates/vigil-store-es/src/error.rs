//! Crate-local error type for the HTTP client boundary. Distinct from [`vigil_core::ports::StoreError`], which
//! is what the `QueryClient`/`StateStore` trait methods return: this type
//! covers fallible construction (building a `reqwest::Client`, parsing a
//! base URL) that happens before any trait call is made.

use derive_more::From;
use orion_error::{ErrorCode, StructError, UvsReason};

#[derive(Debug, Clone, PartialEq, thiserror::Error, From)]
pub enum StoreReason {
    #[error("client construction error")]
    ClientBuild,
    #[error("{0}")]
    Uvs(UvsReason),
}

impl ErrorCode for StoreReason {
    fn error_code(&self) -> i32 {
        match self {
            Self::ClientBuild => 3001,
            Self::Uvs(u) => u.error_code(),
        }
    }
}

pub type StoreError = StructError<StoreReason>;
pub type StoreResult<T> = Result<T, StoreError>;
