//! Error taxonomy for the public operations.
//!
//! Internals use `anyhow`. Only the operation boundary (`DetectionService`,
//! `StreamManager`) converts into `OperationError`, so callers can map each
//! failure to a status without string matching.

use std::fmt;

/// Failure of a public operation.
#[derive(Debug)]
pub enum OperationError {
    /// The frame source could not be acquired (missing or busy device).
    CameraUnavailable(String),
    /// Input bytes did not decode into an image.
    Decode(String),
    /// The classifier failed or produced no label.
    Inference(String),
    /// Requested resource does not exist.
    NotFound(String),
    /// Anything else (store write, poisoned lock, ...).
    Internal(String),
}

impl OperationError {
    pub fn status(&self) -> Status {
        match self {
            OperationError::CameraUnavailable(_) => Status::CameraUnavailable,
            OperationError::Decode(_) => Status::DecodeError,
            OperationError::Inference(_) => Status::InferenceError,
            OperationError::NotFound(_) => Status::NotFound,
            OperationError::Internal(_) => Status::InternalError,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            OperationError::CameraUnavailable(msg)
            | OperationError::Decode(msg)
            | OperationError::Inference(msg)
            | OperationError::NotFound(msg)
            | OperationError::Internal(msg) => msg,
        }
    }
}

impl fmt::Display for OperationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.status().code(), self.message())
    }
}

impl std::error::Error for OperationError {}

impl From<anyhow::Error> for OperationError {
    fn from(err: anyhow::Error) -> Self {
        OperationError::Internal(format!("{:#}", err))
    }
}

/// Outcome codes surfaced to whatever wires the operations up (CLI, HTTP).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Status {
    Success,
    AlreadyRunning,
    CameraUnavailable,
    DecodeError,
    InferenceError,
    NotFound,
    InternalError,
}

impl Status {
    pub fn code(self) -> &'static str {
        match self {
            Status::Success => "success",
            Status::AlreadyRunning => "already_running",
            Status::CameraUnavailable => "camera_unavailable",
            Status::DecodeError => "decode_error",
            Status::InferenceError => "inference_error",
            Status::NotFound => "not_found",
            Status::InternalError => "internal_error",
        }
    }

    /// Process exit code for the CLI.
    pub fn exit_code(self) -> i32 {
        match self {
            Status::Success => 0,
            Status::AlreadyRunning => 2,
            Status::CameraUnavailable => 3,
            Status::DecodeError => 4,
            Status::InferenceError => 5,
            Status::NotFound => 6,
            Status::InternalError => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_prefixes_status_code() {
        let err = OperationError::Decode("no image".to_string());
        assert_eq!(err.to_string(), "decode_error: no image");
        assert_eq!(err.status(), Status::DecodeError);
    }

    #[test]
    fn anyhow_errors_become_internal() {
        let err: OperationError = anyhow::anyhow!("disk full").context("append event").into();
        assert_eq!(err.status(), Status::InternalError);
        assert!(err.message().contains("append event"));
        assert!(err.message().contains("disk full"));
    }

    #[test]
    fn exit_codes_are_distinct() {
        let all = [
            Status::Success,
            Status::AlreadyRunning,
            Status::CameraUnavailable,
            Status::DecodeError,
            Status::InferenceError,
            Status::NotFound,
            Status::InternalError,
        ];
        let mut codes: Vec<i32> = all.iter().map(|s| s.exit_code()).collect();
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), all.len());
    }
}
