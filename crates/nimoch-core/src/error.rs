//! Structured errors for the serve loop, mapped 1:1 onto protocol codes.

use crate::protocol::{CODE_BAD_REQUEST, CODE_INTERNAL_ERROR, CODE_NOT_FOUND};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServeError {
    #[error("client error: {0}")]
    ClientError(String),
    #[error("frame not found")]
    NotFound,
    #[error("internal error: {0}")]
    InternalError(String),
}

impl ServeError {
    pub fn code(&self) -> i64 {
        match self {
            ServeError::ClientError(_) => CODE_BAD_REQUEST,
            ServeError::NotFound => CODE_NOT_FOUND,
            ServeError::InternalError(_) => CODE_INTERNAL_ERROR,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_match_protocol_constants() {
        assert_eq!(ServeError::ClientError("x".into()).code(), 400);
        assert_eq!(ServeError::NotFound.code(), 404);
        assert_eq!(ServeError::InternalError("x".into()).code(), 500);
    }
}
