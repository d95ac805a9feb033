//! Response vocabulary and error types shared by controller and instances

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// String-coded result vocabulary used uniformly across every request family.
///
/// `Ok` exists so the full vocabulary can be rendered, but a successful
/// response travels as `Ok(Payload)` and never carries this code.
#[derive(Debug, Error, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResponseCode {
    #[error("OK")]
    Ok,
    #[error("UNKNOWN")]
    Unknown,
    #[error("NOT_JOINABLE")]
    NotJoinable,
    #[error("NO_FREE_SLOTS")]
    NoFreeSlots,
    #[error("INVALID_PARAMETERS")]
    InvalidParameters,
    #[error("INVALID_ID")]
    InvalidId,
    #[error("INVALID_PLAYER")]
    InvalidPlayer,
    #[error("ILLEGAL_STATE")]
    IllegalState,
    #[error("INSUFFICIENT_RIGHTS")]
    InsufficientRights,
    #[error("ILLEGAL_ARGUMENT")]
    IllegalArgument,
    #[error("CONTROLLER_DISCONNECTED")]
    ControllerDisconnected,
}

impl ResponseCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResponseCode::Ok => "OK",
            ResponseCode::Unknown => "UNKNOWN",
            ResponseCode::NotJoinable => "NOT_JOINABLE",
            ResponseCode::NoFreeSlots => "NO_FREE_SLOTS",
            ResponseCode::InvalidParameters => "INVALID_PARAMETERS",
            ResponseCode::InvalidId => "INVALID_ID",
            ResponseCode::InvalidPlayer => "INVALID_PLAYER",
            ResponseCode::IllegalState => "ILLEGAL_STATE",
            ResponseCode::InsufficientRights => "INSUFFICIENT_RIGHTS",
            ResponseCode::IllegalArgument => "ILLEGAL_ARGUMENT",
            ResponseCode::ControllerDisconnected => "CONTROLLER_DISCONNECTED",
        }
    }

    /// Parses a wire string back into a code; unknown strings map to `Unknown`.
    pub fn from_code(code: &str) -> Self {
        match code {
            "OK" => ResponseCode::Ok,
            "NOT_JOINABLE" => ResponseCode::NotJoinable,
            "NO_FREE_SLOTS" => ResponseCode::NoFreeSlots,
            "INVALID_PARAMETERS" => ResponseCode::InvalidParameters,
            "INVALID_ID" => ResponseCode::InvalidId,
            "INVALID_PLAYER" => ResponseCode::InvalidPlayer,
            "ILLEGAL_STATE" => ResponseCode::IllegalState,
            "INSUFFICIENT_RIGHTS" => ResponseCode::InsufficientRights,
            "ILLEGAL_ARGUMENT" => ResponseCode::IllegalArgument,
            "CONTROLLER_DISCONNECTED" => ResponseCode::ControllerDisconnected,
            _ => ResponseCode::Unknown,
        }
    }
}

/// Failures raised by a packet sink before anything reaches the wire
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("unknown destination `{0}`")]
    UnknownDestination(String),
    #[error("transport closed")]
    Closed,
}

/// Outcome of a correlated request that did not produce a payload
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RequestError {
    /// The remote side answered with a failure code.
    #[error("request rejected: {0}")]
    Rejected(ResponseCode),
    /// The request timed out or was cancelled before a response arrived.
    #[error("request cancelled before a response arrived")]
    Cancelled,
    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl RequestError {
    /// Collapses the error into the protocol vocabulary.
    pub fn code(&self) -> ResponseCode {
        match self {
            RequestError::Rejected(code) => *code,
            RequestError::Cancelled => ResponseCode::Unknown,
            RequestError::Transport(TransportError::Closed) => ResponseCode::ControllerDisconnected,
            RequestError::Transport(TransportError::UnknownDestination(_)) => {
                ResponseCode::InvalidId
            }
        }
    }
}
