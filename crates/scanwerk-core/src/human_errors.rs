// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// User-facing error presentation.
//
// External tools tend to repeat the same warning with a different temp file,
// address or count each time. Messages are normalised before being shown so
// that a user can choose to stop seeing a given class of message.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{ErrorKind, ScanwerkError};

static TEMP_FILE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"scanwerk-[0-9a-zA-Z_/]+\.\w+").expect("valid regex"));
static HEX_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b0[xX][0-9a-fA-F]+\b").expect("valid regex"));
static INT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b\d+\b").expect("valid regex"));

/// Severity of an error from the user's perspective.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Nothing to show; the user asked for it.
    Silent,
    /// The page list changed under the request; usually harmless.
    Warning,
    /// A tool or file operation failed and the result is missing.
    Failure,
}

/// A plain-language error with an actionable suggestion.
#[derive(Debug, Clone)]
pub struct HumanError {
    pub message: String,
    pub suggestion: String,
    pub severity: Severity,
}

/// Describe `err` for display next to the page or job it belongs to.
pub fn humanize_error(err: &ScanwerkError) -> HumanError {
    match err.kind() {
        ErrorKind::UserCancelled => HumanError {
            message: "Cancelled.".into(),
            suggestion: String::new(),
            severity: Severity::Silent,
        },
        ErrorKind::ReferenceNotFound => HumanError {
            message: err.to_string(),
            suggestion: "The page was deleted or replaced before the operation ran.".into(),
            severity: Severity::Warning,
        },
        ErrorKind::DelegateFailure => match err {
            ScanwerkError::DelegateUnavailable { tool, .. } => HumanError {
                message: format!("{tool} could not be started."),
                suggestion: format!("Check that {tool} is installed and on the PATH."),
                severity: Severity::Failure,
            },
            _ => HumanError {
                message: err.to_string(),
                suggestion: "Check the input file and the operation settings.".into(),
                severity: Severity::Failure,
            },
        },
        ErrorKind::ResourceFailure => HumanError {
            message: err.to_string(),
            suggestion: "Check there is free space in the temporary directory.".into(),
            severity: Severity::Failure,
        },
    }
}

/// Collapse the variable parts of a message into placeholders.
///
/// Temp file names become `%%t`, hex numbers `%%x` and integers `%%d`.
pub fn normalize_message(message: &str) -> String {
    let message = message.trim_end();
    let message = TEMP_FILE_RE.replace_all(message, "%%t");
    let message = HEX_RE.replace_all(&message, "%%x");
    INT_RE.replace_all(&message, "%%d").into_owned()
}

/// What to do when a message is seen again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Response {
    /// Show it to the user.
    Show,
    /// Acknowledge silently.
    Ignore,
}

/// Remembers the user's choice per normalised message.
#[derive(Debug, Clone, Default)]
pub struct ErrorMemory {
    choices: HashMap<String, Response>,
}

impl ErrorMemory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that messages like `message` should get `response` from now on.
    pub fn remember(&mut self, message: &str, response: Response) {
        self.choices.insert(normalize_message(message), response);
    }

    /// Whether `message` should be shown, given what has been remembered.
    pub fn should_show(&self, message: &str) -> bool {
        !matches!(
            self.choices.get(&normalize_message(message)),
            Some(Response::Ignore)
        )
    }

    pub fn forget_all(&mut self) {
        self.choices.clear();
    }
}
