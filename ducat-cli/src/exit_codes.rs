//! Exit codes following sysexits.h conventions.
//!
//! These codes give scripts and CI systems a semantic failure mode
//! instead of a bare 1.

#![allow(dead_code)] // Some codes exist for scripts and documentation

/// Successful execution.
pub const SUCCESS: i32 = 0;

/// General error (catch-all).
pub const GENERAL_ERROR: i32 = 1;

/// Command line usage error (invalid arguments).
/// Maps to EX_USAGE from sysexits.h.
pub const USAGE_ERROR: i32 = 64;

/// Data format error (configuration or seed file did not parse).
/// Maps to EX_DATAERR from sysexits.h.
pub const DATA_ERROR: i32 = 65;

/// Cannot open input file.
/// Maps to EX_NOINPUT from sysexits.h.
pub const INPUT_ERROR: i32 = 66;

/// Refused to create the output file (it already exists).
/// Maps to EX_CANTCREAT from sysexits.h.
pub const CANT_CREATE: i32 = 73;

/// I/O error (cannot write output file).
/// Maps to EX_IOERR from sysexits.h.
pub const IO_ERROR: i32 = 74;

/// Represents an exit code with optional error context.
pub struct ExitCode {
    pub code: i32,
    pub message: Option<String>,
}

impl ExitCode {
    pub const fn success() -> Self {
        Self {
            code: SUCCESS,
            message: None,
        }
    }

    pub fn error(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: Some(message.into()),
        }
    }

    pub fn from_anyhow(err: &anyhow::Error) -> Self {
        let message = format!("{err:#}");

        // Classify error by inspecting the chain
        let code = if message.contains("Failed to read") {
            INPUT_ERROR
        } else if message.contains("Invalid configuration") || message.contains("did not parse") {
            DATA_ERROR
        } else if message.contains("Refusing to overwrite") {
            CANT_CREATE
        } else if message.contains("Failed to write") || message.contains("serialize") {
            IO_ERROR
        } else {
            GENERAL_ERROR
        };

        Self {
            code,
            message: Some(message),
        }
    }
}
