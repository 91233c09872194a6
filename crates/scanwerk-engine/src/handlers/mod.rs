// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Operation handlers, one per action.
//
// A handler receives the pages its request names, already resolved and with
// their backing files present, and a `HandlerCtx` for scratch files,
// delegates and streaming results. It returns the terminal outcome; the
// worker turns that into the `finished`, `error` or `cancelled` response.

pub mod export;
pub mod import;
pub mod ocr;
pub mod pixel;
pub mod user_defined;

use std::cell::{Cell, RefCell};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::atomic::{AtomicBool, Ordering};

use scanwerk_core::config::EngineConfig;
use scanwerk_core::error::{Result, ScanwerkError};
use scanwerk_core::types::{Page, PageId, PageRef};
use tokio::sync::mpsc::UnboundedSender;
use tracing::debug;

use crate::process::{DelegateOutput, ProcessRegistry};
use crate::request::{Action, RequestId, Response, ResponseKind};

/// What a successful handler reports.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Outcome {
    /// Pages written by an export, to be flagged as saved.
    pub saved: Vec<PageId>,
}

impl Outcome {
    pub fn saved(pages: &[Page]) -> Self {
        Self {
            saved: pages.iter().map(|page| page.id).collect(),
        }
    }
}

/// Everything a handler may touch while serving one request.
pub struct HandlerCtx<'a> {
    pub config: &'a EngineConfig,
    pub session_dir: &'a Path,
    pub cancel: &'a AtomicBool,
    pub processes: &'a ProcessRegistry,
    pub token: RequestId,
    responses: &'a UnboundedSender<Response>,
    /// Sequence number of the last page emitted by the worker.
    sequence: Cell<u64>,
    emitted: RefCell<Vec<(u64, Page)>>,
}

impl<'a> HandlerCtx<'a> {
    pub fn new(
        config: &'a EngineConfig,
        session_dir: &'a Path,
        cancel: &'a AtomicBool,
        processes: &'a ProcessRegistry,
        token: RequestId,
        responses: &'a UnboundedSender<Response>,
        sequence: u64,
    ) -> Self {
        Self {
            config,
            session_dir,
            cancel,
            processes,
            token,
            responses,
            sequence: Cell::new(sequence),
            emitted: RefCell::new(Vec::new()),
        }
    }

    /// Pages streamed so far with their sequence numbers, in emission order.
    pub(crate) fn take_emitted(&self) -> Vec<(u64, Page)> {
        self.emitted.take()
    }

    fn send(&self, kind: ResponseKind) {
        if self.responses.send(Response::new(self.token, kind)).is_err() {
            debug!(token = %self.token, "controller gone, dropping response");
        }
    }

    /// Stream a result page to the controller.
    pub fn emit_page(&self, page: Page, placement: PageRef) {
        let sequence = self.sequence.get() + 1;
        self.sequence.set(sequence);
        self.emitted.borrow_mut().push((sequence, page.clone()));
        self.send(ResponseKind::Page {
            page: Box::new(page),
            placement,
            sequence,
        });
    }

    /// Report progress.
    pub fn progress(&self, fraction: f64, message: impl Into<String>) {
        self.send(ResponseKind::Running {
            progress: Some(fraction.clamp(0.0, 1.0)),
            message: Some(message.into()),
        });
    }

    /// Forward a message without a progress fraction.
    pub fn message(&self, message: impl Into<String>) {
        self.send(ResponseKind::Running {
            progress: None,
            message: Some(message.into()),
        });
    }

    pub fn check_cancelled(&self) -> Result<()> {
        if self.cancel.load(Ordering::SeqCst) {
            return Err(ScanwerkError::Cancelled);
        }
        Ok(())
    }

    /// A fresh, empty file in the session directory that outlives the
    /// request.
    pub fn temp_file(&self, suffix: &str) -> Result<PathBuf> {
        tempfile::Builder::new()
            .prefix("scanwerk-")
            .suffix(suffix)
            .tempfile_in(self.session_dir)
            .map_err(|err| ScanwerkError::scratch(self.session_dir, err))?
            .into_temp_path()
            .keep()
            .map_err(|err| ScanwerkError::scratch(self.session_dir, err))
    }

    /// A scratch directory removed when the returned guard drops.
    pub fn temp_dir(&self) -> Result<tempfile::TempDir> {
        tempfile::Builder::new()
            .prefix("scanwerk-")
            .tempdir_in(self.session_dir)
            .map_err(|err| ScanwerkError::scratch(self.session_dir, err))
    }

    /// Run a delegate, killable by cancellation.
    pub fn run(&self, command: Command) -> Result<DelegateOutput> {
        self.processes.run(command, self.cancel)
    }

    /// Run `script` through the configured shell.
    pub fn run_shell(&self, script: &str) -> Result<DelegateOutput> {
        let mut command = Command::new(&self.config.tools.shell);
        command.arg("-c").arg(script);
        self.run(command)
    }
}

/// Serve `action` on `pages`, which are in the order [`Action::pages`]
/// lists them.
pub fn dispatch(action: &Action, pages: Vec<Page>, ctx: &HandlerCtx<'_>) -> Result<Outcome> {
    let single = || -> Result<&Page> {
        pages
            .first()
            .ok_or_else(|| ScanwerkError::InvalidRequest(format!("{}: no page", action.name())))
    };
    match action {
        Action::Import { paths, placement } => import::import_files(ctx, paths, *placement),
        Action::Rotate { angle, .. } => pixel::rotate(ctx, single()?, *angle),
        Action::Crop {
            x, y, width, height, ..
        } => pixel::crop(ctx, single()?, *x, *y, *width, *height),
        Action::Split {
            direction, position, ..
        } => pixel::split(ctx, single()?, *direction, *position),
        Action::Threshold { percent, .. } => pixel::threshold(ctx, single()?, *percent),
        Action::BrightnessContrast {
            brightness, contrast, ..
        } => pixel::brightness_contrast(ctx, single()?, *brightness, *contrast),
        Action::Negate { .. } => pixel::negate(ctx, single()?),
        Action::Unsharp {
            radius,
            percent,
            threshold,
            ..
        } => pixel::unsharp(ctx, single()?, *radius, *percent, *threshold),
        Action::Analyse { .. } => pixel::analyse(ctx, &pages),
        Action::Ocr {
            language, backend, ..
        } => ocr::recognise(ctx, single()?, language, *backend),
        Action::UserDefined { command, .. } => user_defined::run(ctx, single()?, command),
        Action::SavePdf {
            target,
            metadata,
            downsample_dpi,
            ..
        } => export::save_pdf(ctx, &pages, target, metadata, *downsample_dpi),
        Action::SaveDjvu {
            target, metadata, ..
        } => export::save_djvu(ctx, &pages, target, metadata),
        Action::SaveTiff {
            target, compression, ..
        } => export::save_tiff(ctx, &pages, target, *compression),
        Action::SaveImage { target, .. } => export::save_image(ctx, &pages, target),
        Action::SaveText { target, .. } => export::save_text(ctx, &pages, target),
        Action::SaveHocr { target, .. } => export::save_hocr(ctx, &pages, target),
        Action::Cancel => Ok(Outcome::default()),
    }
}

/// Replace every `%i`-style placeholder in `template`.
///
/// `%%` yields a literal percent sign.
pub(crate) fn expand_placeholders(template: &str, values: &[(char, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut chars = template.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        match chars.peek().copied() {
            Some('%') => {
                chars.next();
                out.push('%');
            }
            Some(key) => match values.iter().find(|(k, _)| *k == key) {
                Some((_, value)) => {
                    chars.next();
                    out.push_str(value);
                }
                None => out.push('%'),
            },
            None => out.push('%'),
        }
    }
    out
}

/// Quote `value` for a POSIX shell.
pub(crate) fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}
