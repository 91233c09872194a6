// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Scanwerk — Core page types, text layers and error definitions shared across all crates.

pub mod bbox;
pub mod config;
pub mod error;
pub mod human_errors;
pub mod types;

pub use bbox::{Bbox, BboxTree, BoxKind};
pub use config::{EngineConfig, ToolPaths};
pub use error::{ErrorKind, Result, ScanwerkError};
pub use types::*;
