//! CLI Exit Codes
//!
//! Standard exit codes for CLI operations and automation.

use crate::core::dispatch::DispatchError;
use crate::core::link::{LinkError, LinkErrorKind};
use crate::core::profile::StoreError;
use std::process::ExitCode;

/// Exit code constants
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitCodes;

impl ExitCodes {
    /// Success
    pub const SUCCESS: u8 = 0;

    /// General error
    pub const ERROR: u8 = 1;

    /// Invalid arguments
    pub const INVALID_ARGS: u8 = 2;

    /// Connection failed
    pub const CONNECTION_FAILED: u8 = 3;

    /// Connection timeout
    pub const TIMEOUT: u8 = 4;

    /// Serial support missing
    pub const UNSUPPORTED: u8 = 5;

    /// I/O failure during a session
    pub const IO_ERROR: u8 = 6;

    /// Not connected
    pub const NOT_CONNECTED: u8 = 7;

    /// Configuration error
    pub const CONFIG_ERROR: u8 = 8;

    /// Profile storage error
    pub const PROFILE_ERROR: u8 = 9;

    /// Profile or command not found
    pub const NOT_FOUND: u8 = 10;

    /// Device busy
    pub const DEVICE_BUSY: u8 = 13;

    /// Internal error
    pub const INTERNAL_ERROR: u8 = 127;
}

/// CLI operation result
#[derive(Debug)]
pub enum CliResult {
    /// Success with optional message
    Success(Option<String>),

    /// Error with code and message
    Error(u8, String),
}

impl CliResult {
    /// Plain success
    pub fn success() -> Self {
        Self::Success(None)
    }

    /// Success with a message
    pub fn success_with_message(msg: impl Into<String>) -> Self {
        Self::Success(Some(msg.into()))
    }

    /// Error with an explicit code
    pub fn error(code: u8, msg: impl Into<String>) -> Self {
        Self::Error(code, msg.into())
    }

    /// Nothing matched the given name
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::Error(ExitCodes::NOT_FOUND, msg.into())
    }

    /// Timed out waiting for the link
    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Error(ExitCodes::TIMEOUT, msg.into())
    }

    /// Get exit code
    pub fn code(&self) -> u8 {
        match self {
            Self::Success(_) => ExitCodes::SUCCESS,
            Self::Error(code, _) => *code,
        }
    }

    /// Get message
    pub fn message(&self) -> Option<&str> {
        match self {
            Self::Success(Some(msg)) | Self::Error(_, msg) => Some(msg),
            Self::Success(None) => None,
        }
    }

    /// Convert to ExitCode
    pub fn to_exit_code(&self) -> ExitCode {
        ExitCode::from(self.code())
    }

    /// Is success?
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }
}

impl From<&LinkError> for CliResult {
    fn from(err: &LinkError) -> Self {
        let code = match err.kind() {
            LinkErrorKind::CapabilityUnavailable => ExitCodes::UNSUPPORTED,
            LinkErrorKind::OpenFailed => ExitCodes::CONNECTION_FAILED,
            LinkErrorKind::ReadFailed | LinkErrorKind::WriteFailed => ExitCodes::IO_ERROR,
            LinkErrorKind::NotOpen => ExitCodes::NOT_CONNECTED,
            LinkErrorKind::Busy => ExitCodes::DEVICE_BUSY,
        };
        Self::Error(code, err.to_string())
    }
}

impl From<&StoreError> for CliResult {
    fn from(err: &StoreError) -> Self {
        let code = match err {
            StoreError::Catalog(_) | StoreError::ProfileExists(_) => ExitCodes::INVALID_ARGS,
            StoreError::ProfileNotFound(_) => ExitCodes::NOT_FOUND,
            StoreError::IoUnavailable { .. } | StoreError::MalformedRecord { .. } => {
                ExitCodes::PROFILE_ERROR
            }
        };
        Self::Error(code, err.to_string())
    }
}

impl From<DispatchError> for CliResult {
    fn from(err: DispatchError) -> Self {
        let code = match err {
            DispatchError::NotReady => ExitCodes::NOT_CONNECTED,
            DispatchError::EmptyPayload => ExitCodes::INVALID_ARGS,
        };
        Self::Error(code, err.to_string())
    }
}

/// Exit code description
pub fn exit_code_description(code: u8) -> &'static str {
    match code {
        0 => "Success",
        1 => "General error",
        2 => "Invalid arguments",
        3 => "Connection failed",
        4 => "Connection timeout",
        5 => "Serial support unavailable",
        6 => "Serial I/O error",
        7 => "Not connected",
        8 => "Configuration error",
        9 => "Profile storage error",
        10 => "Not found",
        13 => "Device busy",
        127 => "Internal error",
        _ => "Unknown error",
    }
}

/// Print exit code table
pub fn print_exit_codes() {
    println!("Exit Codes:");
    for code in [0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 13, 127] {
        println!("  {:>3}  {}", code, exit_code_description(code));
    }
}
