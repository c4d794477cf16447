// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Unified error taxonomy for Etikett.
//
// Every fallible operation in the engine resolves to exactly one of these
// variants. Each variant carries a stable code string that crosses the
// bridge boundary unchanged, so remote callers can match on codes without
// parsing messages.

use thiserror::Error;

/// Top-level error type for all Etikett operations.
#[derive(Debug, Error)]
pub enum EtikettError {
    // -- Argument validation (fails fast, no I/O attempted) --
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    // -- Discovery --
    #[error("printer discovery failed: {0}")]
    Discovery(String),

    #[error("no printer matching {0}")]
    PrinterNotFound(String),

    // -- USB permission flow --
    #[error("no usable USB device: {0}")]
    NoDevice(String),

    #[error("USB permission denied for {0}")]
    PermissionDenied(String),

    #[error("a USB permission request is already pending")]
    PermissionBusy,

    // -- Dispatch --
    #[error("could not open connection to printer: {0}")]
    FailedToOpenConnection(String),

    #[error("could not clear printer buffer: {0}")]
    FailedToClearBuffer(String),

    #[error("could not send command: {0}")]
    FailedToSendCommand(String),

    #[error("operation timed out: {0}")]
    Timeout(String),

    // -- Catch-all for unanticipated transport faults --
    #[error("unexpected error: {0}")]
    Unexpected(String),

    // -- Ambient --
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl EtikettError {
    /// Stable machine-readable code delivered across the bridge.
    ///
    /// Codes are part of the external contract; renaming one is a breaking
    /// change for every remote caller.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidArgument(_) => "INVALID_ARGUMENT",
            Self::Discovery(_) => "DISCOVERY_ERROR",
            Self::PrinterNotFound(_) => "PRINTER_NOT_FOUND",
            Self::NoDevice(_) => "NO_DEVICE",
            Self::PermissionDenied(_) => "PERMISSION_DENIED",
            Self::PermissionBusy => "PERMISSION_BUSY",
            Self::FailedToOpenConnection(_) => "FAILED_TO_OPEN_CONNECTION",
            Self::FailedToClearBuffer(_) => "FAILED_TO_CLEAR_BUFFER",
            Self::FailedToSendCommand(_) => "FAILED_TO_SEND_COMMAND",
            Self::Timeout(_) => "TIMEOUT",
            Self::Unexpected(_) => "UNEXPECTED_ERROR",
            Self::Io(_) => "IO_ERROR",
            Self::Serialization(_) => "SERIALIZATION_ERROR",
        }
    }
}

/// Alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, EtikettError>;
