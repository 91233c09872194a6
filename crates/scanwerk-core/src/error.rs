// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Unified error types for Scanwerk.

use thiserror::Error;

use crate::types::PageId;

/// Top-level error type for all Scanwerk operations.
#[derive(Debug, Error)]
pub enum ScanwerkError {
    // -- Page references --
    #[error("requested page {0} does not exist")]
    PageNotFound(PageId),

    #[error("page {page} no longer exists, cannot {action}")]
    PageGone { page: PageId, action: String },

    // -- Delegates --
    #[error("{tool} exited with status {status}: {stderr}")]
    Delegate {
        tool: String,
        status: i32,
        stderr: String,
    },

    #[error("unable to run {tool}: {reason}")]
    DelegateUnavailable { tool: String, reason: String },

    #[error("image processing failed: {0}")]
    ImageError(String),

    #[error("PDF operation failed: {0}")]
    PdfError(String),

    #[error("OCR failed: {0}")]
    OcrError(String),

    #[error("unsupported file format: {0}")]
    UnsupportedFormat(String),

    // -- Resources --
    #[error("unable to write to {path}: {reason}")]
    Scratch { path: String, reason: String },

    #[error("session error: {0}")]
    Session(String),

    #[error("database error: {0}")]
    Database(String),

    // -- Requests --
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("worker is no longer running")]
    WorkerGone,

    // -- Conversions --
    #[error("file I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, ScanwerkError>;

/// Coarse classification of an error, driving how the controller reports it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The request named a page that is no longer present.
    ReferenceNotFound,
    /// An external tool or decoder failed.
    DelegateFailure,
    /// A scratch file or directory could not be created.
    ResourceFailure,
    /// The user cancelled; never shown as an error.
    UserCancelled,
}

impl ScanwerkError {
    /// Map this error onto the reporting taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::PageNotFound(_) | Self::PageGone { .. } => ErrorKind::ReferenceNotFound,

            Self::Delegate { .. }
            | Self::DelegateUnavailable { .. }
            | Self::ImageError(_)
            | Self::PdfError(_)
            | Self::OcrError(_)
            | Self::UnsupportedFormat(_)
            | Self::InvalidRequest(_)
            | Self::Serialization(_) => ErrorKind::DelegateFailure,

            Self::Scratch { .. }
            | Self::Session(_)
            | Self::Database(_)
            | Self::WorkerGone => ErrorKind::ResourceFailure,

            Self::Cancelled => ErrorKind::UserCancelled,

            Self::Io(io_err) => match io_err.kind() {
                std::io::ErrorKind::NotFound => ErrorKind::ReferenceNotFound,
                std::io::ErrorKind::Interrupted => ErrorKind::UserCancelled,
                _ => ErrorKind::ResourceFailure,
            },
        }
    }

    /// Whether this error is a cancellation rather than a failure.
    pub fn is_cancelled(&self) -> bool {
        self.kind() == ErrorKind::UserCancelled
    }

    /// Build a [`ScanwerkError::Scratch`] for a failed temp-file creation.
    pub fn scratch(path: impl AsRef<std::path::Path>, err: impl std::fmt::Display) -> Self {
        Self::Scratch {
            path: path.as_ref().display().to_string(),
            reason: err.to_string(),
        }
    }
}
