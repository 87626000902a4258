//! Error types

mod client_error;

pub use client_error::{ApiErrorBody, ClientError, ClientResult, ErrorKind};
