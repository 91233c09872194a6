// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// The controller side of the engine.
//
// A `Document` owns the page collection, the callback dispatcher and the
// worker handle. Operations are queued and return at once with a request
// token; `poll` drains the responses, applies result pages to the collection
// and fires the caller's callbacks. Nothing here blocks on the worker.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use scanwerk_core::config::EngineConfig;
use scanwerk_core::error::{ErrorKind, Result, ScanwerkError};
use scanwerk_core::human_errors::{ErrorMemory, Response as ErrorChoice};
use scanwerk_core::types::{PageId, PageRef, Selection};
use scanwerk_document::{PdfMetadata, SplitDirection};
use tracing::{debug, info, instrument, warn};

use crate::collection::{PageCollection, PageTable};
use crate::dispatcher::{Callbacks, Dispatcher, JobStatus};
use crate::process::ProcessRegistry;
use crate::request::{
    Action, ExportTarget, OcrBackend, Request, RequestId, Response, ResponseKind, TiffCompression,
};
use crate::session::Session;
use crate::store::SessionStore;
use crate::worker::{Worker, WorkerHandle};

/// A scanned document being edited: pages, queue and session.
pub struct Document {
    // Field order is drop order: stop the worker before the session
    // directory goes away.
    worker: WorkerHandle,
    dispatcher: Dispatcher,
    pages: PageCollection,
    /// Action name by pending request, for errors raised while applying
    /// its results.
    actions: HashMap<RequestId, &'static str>,
    errors: ErrorMemory,
    config: EngineConfig,
    session: Session,
}

impl Document {
    /// Start a fresh session under the configured scratch root.
    pub fn new(config: EngineConfig) -> Result<Self> {
        let session = Session::create(&config.scratch_root)?;
        Self::with_session(config, session)
    }

    /// Start the worker for an existing session directory.
    #[instrument(skip_all, fields(session = %session.dir().display()))]
    pub fn with_session(config: EngineConfig, session: Session) -> Result<Self> {
        let table = PageTable::default();
        let pages = PageCollection::new(Arc::clone(&table))
            .with_free_space_check(session.dir(), config.free_space_warning_mib);
        let worker = Worker::spawn(
            config.clone(),
            session.dir().to_path_buf(),
            table,
            Arc::new(AtomicBool::new(false)),
            ProcessRegistry::new(),
        )?;
        info!("document ready");
        Ok(Self {
            worker,
            dispatcher: Dispatcher::new(),
            pages,
            actions: HashMap::new(),
            errors: ErrorMemory::new(),
            config,
            session,
        })
    }

    /// Take over a crashed session and reload its pages.
    pub fn restore(config: EngineConfig, dir: impl AsRef<Path>) -> Result<Self> {
        let session = Session::restore(dir)?;
        let mut document = Self::with_session(config, session)?;
        document.open_session()?;
        Ok(document)
    }

    // -- Access ---------------------------------------------------------------

    pub fn pages(&self) -> &PageCollection {
        &self.pages
    }

    pub fn pages_mut(&mut self) -> &mut PageCollection {
        &mut self.pages
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// `(jobs_completed, jobs_total)` for the current run of the queue.
    pub fn counts(&self) -> (usize, usize) {
        self.dispatcher.counts()
    }

    /// Whether every submitted request has had its terminal response.
    pub fn is_idle(&self) -> bool {
        self.dispatcher.pending() == 0
    }

    /// Stop showing errors like `message`.
    pub fn ignore_errors_like(&mut self, message: &str) {
        self.errors.remember(message, ErrorChoice::Ignore);
    }

    // -- Submission -----------------------------------------------------------

    /// Validate `action`, queue it and fire its `queued` callback.
    #[instrument(skip_all, fields(action = action.name()))]
    pub fn submit(&mut self, action: Action, callbacks: Callbacks) -> Result<RequestId> {
        action.validate()?;
        for id in action.pages() {
            if self.pages.index_of(id).is_none() {
                return Err(ScanwerkError::PageNotFound(id));
            }
        }
        if let Action::Import {
            placement: PageRef::InsertAfter(id),
            ..
        } = action
            && self.pages.index_of(id).is_none()
        {
            return Err(ScanwerkError::PageNotFound(id));
        }
        if !action.is_export() && !matches!(action, Action::Analyse { .. } | Action::Cancel) {
            self.snapshot();
        }

        let token = RequestId::new();
        let name = action.name();
        self.worker.send(Request { token, action })?;
        self.actions.insert(token, name);
        self.dispatcher.register(token, callbacks);
        debug!(token = %token, "request queued");
        Ok(token)
    }

    pub fn import_files(&mut self, paths: Vec<PathBuf>, placement: PageRef, callbacks: Callbacks) -> Result<RequestId> {
        self.submit(Action::Import { paths, placement }, callbacks)
    }

    pub fn rotate(&mut self, page: PageId, angle: i32, callbacks: Callbacks) -> Result<RequestId> {
        self.submit(Action::Rotate { page, angle }, callbacks)
    }

    pub fn crop(
        &mut self,
        page: PageId,
        (x, y, width, height): (u32, u32, u32, u32),
        callbacks: Callbacks,
    ) -> Result<RequestId> {
        self.submit(
            Action::Crop {
                page,
                x,
                y,
                width,
                height,
            },
            callbacks,
        )
    }

    pub fn split(
        &mut self,
        page: PageId,
        direction: SplitDirection,
        position: u32,
        callbacks: Callbacks,
    ) -> Result<RequestId> {
        self.submit(
            Action::Split {
                page,
                direction,
                position,
            },
            callbacks,
        )
    }

    pub fn threshold(&mut self, page: PageId, percent: f32, callbacks: Callbacks) -> Result<RequestId> {
        self.submit(Action::Threshold { page, percent }, callbacks)
    }

    pub fn brightness_contrast(
        &mut self,
        page: PageId,
        brightness: f32,
        contrast: f32,
        callbacks: Callbacks,
    ) -> Result<RequestId> {
        self.submit(
            Action::BrightnessContrast {
                page,
                brightness,
                contrast,
            },
            callbacks,
        )
    }

    pub fn negate(&mut self, page: PageId, callbacks: Callbacks) -> Result<RequestId> {
        self.submit(Action::Negate { page }, callbacks)
    }

    pub fn unsharp(
        &mut self,
        page: PageId,
        radius: f32,
        percent: f32,
        threshold: u8,
        callbacks: Callbacks,
    ) -> Result<RequestId> {
        self.submit(
            Action::Unsharp {
                page,
                radius,
                percent,
                threshold,
            },
            callbacks,
        )
    }

    pub fn analyse(&mut self, pages: Vec<PageId>, callbacks: Callbacks) -> Result<RequestId> {
        self.submit(Action::Analyse { pages }, callbacks)
    }

    /// Recognise `page`, in the configured language unless one is given.
    pub fn ocr(
        &mut self,
        page: PageId,
        language: Option<String>,
        backend: OcrBackend,
        callbacks: Callbacks,
    ) -> Result<RequestId> {
        let language = language.unwrap_or_else(|| self.config.ocr_language.clone());
        self.submit(
            Action::Ocr {
                page,
                language,
                backend,
            },
            callbacks,
        )
    }

    pub fn user_defined(&mut self, page: PageId, command: impl Into<String>, callbacks: Callbacks) -> Result<RequestId> {
        self.submit(
            Action::UserDefined {
                page,
                command: command.into(),
            },
            callbacks,
        )
    }

    pub fn save_pdf(
        &mut self,
        pages: Vec<PageId>,
        target: ExportTarget,
        metadata: PdfMetadata,
        downsample_dpi: Option<f64>,
        callbacks: Callbacks,
    ) -> Result<RequestId> {
        self.submit(
            Action::SavePdf {
                pages,
                target,
                metadata,
                downsample_dpi,
            },
            callbacks,
        )
    }

    pub fn save_djvu(
        &mut self,
        pages: Vec<PageId>,
        target: ExportTarget,
        metadata: PdfMetadata,
        callbacks: Callbacks,
    ) -> Result<RequestId> {
        self.submit(
            Action::SaveDjvu {
                pages,
                target,
                metadata,
            },
            callbacks,
        )
    }

    pub fn save_tiff(
        &mut self,
        pages: Vec<PageId>,
        target: ExportTarget,
        compression: TiffCompression,
        callbacks: Callbacks,
    ) -> Result<RequestId> {
        self.submit(
            Action::SaveTiff {
                pages,
                target,
                compression,
            },
            callbacks,
        )
    }

    pub fn save_image(&mut self, pages: Vec<PageId>, target: ExportTarget, callbacks: Callbacks) -> Result<RequestId> {
        self.submit(Action::SaveImage { pages, target }, callbacks)
    }

    pub fn save_text(&mut self, pages: Vec<PageId>, target: ExportTarget, callbacks: Callbacks) -> Result<RequestId> {
        self.submit(Action::SaveText { pages, target }, callbacks)
    }

    pub fn save_hocr(&mut self, pages: Vec<PageId>, target: ExportTarget, callbacks: Callbacks) -> Result<RequestId> {
        self.submit(Action::SaveHocr { pages, target }, callbacks)
    }

    /// Cancel everything queued or running.
    ///
    /// Queued requests are answered `cancelled` without running, running
    /// delegates are killed (`on_kill` gets each PID) and `on_cancelled`
    /// fires once the worker has acknowledged.
    #[instrument(skip_all)]
    pub fn cancel(
        &mut self,
        on_cancelled: impl FnOnce(&JobStatus) + 'static,
        on_kill: impl FnMut(u32),
    ) -> Result<RequestId> {
        self.worker.cancel_flag().store(true, Ordering::SeqCst);
        let killed = self.worker.processes().kill_all(on_kill);
        info!(killed, "cancelling queued requests");
        self.submit(Action::Cancel, Callbacks::new().on_finished(on_cancelled))
    }

    // -- Responses ------------------------------------------------------------

    /// Apply every response that has arrived and fire its callbacks. Returns
    /// how many were handled.
    pub fn poll(&mut self) -> usize {
        let mut handled = 0;
        while let Some(response) = self.worker.try_recv() {
            self.apply(response);
            handled += 1;
        }
        handled
    }

    /// Poll until the queue is empty or `timeout` passes. Returns whether the
    /// queue drained.
    pub fn wait_idle(&mut self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let interval = Duration::from_millis(self.config.poll_interval_ms.max(1));
        loop {
            self.poll();
            if self.is_idle() {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(interval);
        }
    }

    fn apply(&mut self, response: Response) {
        let token = response.token;
        match &response.kind {
            ResponseKind::Page {
                page,
                placement,
                sequence,
            } => {
                let applied = self.pages.add_page(*placement, page.as_ref().clone());
                self.worker.mark_applied(*sequence);
                if let Err(err) = applied {
                    warn!(token = %token, error = %err, "unable to apply result page");
                    let message = err.to_string();
                    if self.errors.should_show(&message) {
                        let action = self.actions.get(&token).copied().unwrap_or("display");
                        self.dispatcher
                            .report(token, Some(page.id), action, message, ErrorKind::ReferenceNotFound);
                    }
                    return;
                }
            }
            ResponseKind::Finished { saved } if !saved.is_empty() => self.pages.mark_saved(saved),
            ResponseKind::Error { message, .. } if !self.errors.should_show(message) => {
                debug!(token = %token, message = %message, "error dismissed");
                self.actions.remove(&token);
                self.dispatcher.dismiss(token);
                return;
            }
            _ => {}
        }
        if response.kind.is_terminal() {
            self.actions.remove(&token);
        }
        self.dispatcher.handle(&response);
    }

    // -- Editing --------------------------------------------------------------

    /// Store the current pages for [`Self::undo`].
    pub fn snapshot(&mut self) {
        if let Some(free) = self.pages.take_snapshot() {
            warn!(free_mib = free, "running low on space for the session");
        }
    }

    pub fn undo(&mut self) -> bool {
        self.pages.undo()
    }

    pub fn redo(&mut self) -> bool {
        self.pages.redo()
    }

    pub fn delete_selection(&mut self) -> usize {
        self.snapshot();
        self.pages.delete_selection().len()
    }

    pub fn cut_selection(&mut self) -> usize {
        self.snapshot();
        self.pages.cut_selection()
    }

    pub fn copy_selection(&mut self) -> usize {
        self.pages.copy_selection()
    }

    pub fn paste_selection(&mut self, after: Option<PageId>) -> Result<Vec<PageId>> {
        self.snapshot();
        self.pages.paste_selection(after)
    }

    pub fn renumber(&mut self, start: Option<u32>, step: Option<i32>, selection: Selection) -> Result<()> {
        self.snapshot();
        self.pages.renumber(start, step, selection)
    }

    // -- Sessions -------------------------------------------------------------

    /// Write the page records to the session database.
    pub fn save_session(&self) -> Result<()> {
        SessionStore::open(self.session.db_path())?.save_pages(self.pages.rows())
    }

    /// Replace the pages with those in the session database.
    pub fn open_session(&mut self) -> Result<()> {
        let rows = SessionStore::open(self.session.db_path())?.load_pages()?;
        info!(pages = rows.len(), "session reloaded");
        self.pages.replace_rows(rows);
        Ok(())
    }
}
