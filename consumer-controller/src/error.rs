// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use std::fmt::Display;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ControllerError {
    // Bad endpoint, address or tuning value, detected before any session is opened
    #[error("invalid configuration: {0}")]
    Config(String),
    // Transport could not reach the node
    #[error("connection error: {0}")]
    Connection(String),
    // The session was closed before or while the request was running
    #[error("connection closed: {0}")]
    ConnectionClosed(String),
    // The node rejected or failed a JSON-RPC request
    #[error("RPC error: {0}")]
    Rpc(String),
    // A contract view call reverted or was rejected
    #[error("contract call failed: {0}")]
    ContractCall(String),
    // Malformed wire response
    #[error("decode error: {0}")]
    Decode(String),
    #[error("the start height {start} should not be higher than the end height {end}")]
    InvalidRange { start: u64, end: u64 },
    #[error("no block at height {height}")]
    NotFound { height: u64 },
    #[error("request timed out: {0}")]
    Timeout(String),
    // Internal signal of the log searches, never returned by the controller
    #[error("event not found: {0}")]
    EventNotFound(String),
}

impl ControllerError {
    /// Prefixes the message with the sub-step that failed, keeping the variant.
    pub fn context(self, step: impl Display) -> Self {
        match self {
            ControllerError::Config(m) => ControllerError::Config(format!("{step}: {m}")),
            ControllerError::Connection(m) => ControllerError::Connection(format!("{step}: {m}")),
            ControllerError::ConnectionClosed(m) => {
                ControllerError::ConnectionClosed(format!("{step}: {m}"))
            }
            ControllerError::Rpc(m) => ControllerError::Rpc(format!("{step}: {m}")),
            ControllerError::ContractCall(m) => {
                ControllerError::ContractCall(format!("{step}: {m}"))
            }
            ControllerError::Decode(m) => ControllerError::Decode(format!("{step}: {m}")),
            ControllerError::Timeout(m) => ControllerError::Timeout(format!("{step}: {m}")),
            ControllerError::EventNotFound(m) => {
                ControllerError::EventNotFound(format!("{step}: {m}"))
            }
            structured @ (ControllerError::InvalidRange { .. }
            | ControllerError::NotFound { .. }) => structured,
        }
    }

    /// Returns a short string identifying the error type for metrics labels
    pub fn error_type(&self) -> &'static str {
        match self {
            ControllerError::Config(_) => "config",
            ControllerError::Connection(_) => "connection",
            ControllerError::ConnectionClosed(_) => "connection_closed",
            ControllerError::Rpc(_) => "rpc",
            ControllerError::ContractCall(_) => "contract_call",
            ControllerError::Decode(_) => "decode",
            ControllerError::InvalidRange { .. } => "invalid_range",
            ControllerError::NotFound { .. } => "not_found",
            ControllerError::Timeout(_) => "timeout",
            ControllerError::EventNotFound(_) => "event_not_found",
        }
    }
}

pub type ControllerResult<T> = Result<T, ControllerError>;
