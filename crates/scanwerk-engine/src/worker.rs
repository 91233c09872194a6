// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// The worker thread.
//
// One dedicated thread drains the request channel in order. For each request
// it resolves page identities against the shared page table, runs the
// handler and answers with exactly one terminal response. While the
// cancellation flag is set every request is answered `Cancelled` unseen,
// until the cancel acknowledgement clears the flag.

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};

use scanwerk_core::config::EngineConfig;
use scanwerk_core::error::{ErrorKind, Result, ScanwerkError};
use scanwerk_core::types::{Page, PageId};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::mpsc::error::TryRecvError;
use tracing::{debug, error, info, instrument, warn};

use crate::collection::PageTable;
use crate::handlers::{self, HandlerCtx};
use crate::process::ProcessRegistry;
use crate::request::{Action, Request, RequestId, Response, ResponseKind};

/// A page the worker emitted that the controller has not applied yet.
///
/// Later requests naming the page see this revision instead of the table's
/// until the controller acknowledges `sequence`.
#[derive(Debug, Clone)]
struct Produced {
    sequence: u64,
    page: Page,
}

impl Produced {
    fn is_pending(&self, applied: u64) -> bool {
        self.sequence > applied
    }
}

/// State owned by the worker thread.
pub struct Worker {
    config: EngineConfig,
    session_dir: PathBuf,
    table: PageTable,
    cancel: Arc<AtomicBool>,
    processes: ProcessRegistry,
    responses: UnboundedSender<Response>,
    produced: HashMap<PageId, Produced>,
    /// Sequence number of the last page emitted.
    sequence: u64,
    /// Highest sequence number the controller has applied.
    applied: Arc<AtomicU64>,
}

impl Worker {
    /// Start the worker thread.
    pub fn spawn(
        config: EngineConfig,
        session_dir: PathBuf,
        table: PageTable,
        cancel: Arc<AtomicBool>,
        processes: ProcessRegistry,
    ) -> Result<WorkerHandle> {
        let (request_tx, request_rx) = mpsc::unbounded_channel();
        let (response_tx, response_rx) = mpsc::unbounded_channel();
        let applied = Arc::new(AtomicU64::new(0));
        let worker = Worker {
            config,
            session_dir,
            table,
            cancel: Arc::clone(&cancel),
            processes: processes.clone(),
            responses: response_tx,
            produced: HashMap::new(),
            sequence: 0,
            applied: Arc::clone(&applied),
        };
        let thread = thread::Builder::new()
            .name("scanwerk-worker".into())
            .spawn(move || worker.run(request_rx))?;
        Ok(WorkerHandle {
            requests: Some(request_tx),
            responses: response_rx,
            thread: Some(thread),
            cancel,
            processes,
            applied,
        })
    }

    fn run(mut self, mut requests: UnboundedReceiver<Request>) {
        info!(session = %self.session_dir.display(), "worker started");
        while let Some(request) = requests.blocking_recv() {
            self.serve(request);
        }
        info!("worker stopped");
    }

    fn send(&self, token: RequestId, kind: ResponseKind) {
        if self.responses.send(Response::new(token, kind)).is_err() {
            debug!(token = %token, "controller gone, dropping response");
        }
    }

    #[instrument(skip_all, fields(token = %request.token, action = request.action.name()))]
    fn serve(&mut self, request: Request) {
        let Request { token, action } = request;
        if let Action::Cancel = action {
            self.cancel.store(false, Ordering::SeqCst);
            info!("cancellation acknowledged");
            self.send(token, ResponseKind::Finished { saved: Vec::new() });
            return;
        }
        if self.cancel.load(Ordering::SeqCst) {
            debug!("skipping request while cancelling");
            self.send(token, ResponseKind::Cancelled);
            return;
        }

        self.prune();
        let pages = match self.resolve(&action) {
            Ok(pages) => pages,
            Err(err) => {
                warn!(error = %err, "unable to resolve pages");
                let page = match &err {
                    ScanwerkError::PageNotFound(id) | ScanwerkError::PageGone { page: id, .. } => Some(*id),
                    _ => action.pages().first().copied(),
                };
                self.send(token, error_response(page, &action, &err));
                return;
            }
        };

        self.send(token, ResponseKind::Started);
        let ctx = HandlerCtx::new(
            &self.config,
            &self.session_dir,
            &self.cancel,
            &self.processes,
            token,
            &self.responses,
            self.sequence,
        );
        let result = panic::catch_unwind(AssertUnwindSafe(|| handlers::dispatch(&action, pages, &ctx)));
        let emitted = ctx.take_emitted();

        let kind = match result {
            Ok(Ok(outcome)) => {
                info!(pages = emitted.len(), saved = outcome.saved.len(), "request finished");
                ResponseKind::Finished { saved: outcome.saved }
            }
            Ok(Err(err)) if err.is_cancelled() || self.cancel.load(Ordering::SeqCst) => {
                info!("request cancelled");
                ResponseKind::Cancelled
            }
            Ok(Err(err)) => {
                warn!(error = %err, "request failed");
                error_response(action.pages().first().copied(), &action, &err)
            }
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                error!(message = %message, "handler panicked");
                ResponseKind::Error {
                    page: action.pages().first().copied(),
                    action: action.name(),
                    message,
                    kind: ErrorKind::DelegateFailure,
                }
            }
        };
        self.record(emitted);
        self.send(token, kind);
    }

    /// Forget produced pages the controller has applied. From then on the
    /// table is authoritative, including after an undo.
    fn prune(&mut self) {
        let applied = self.applied.load(Ordering::SeqCst);
        self.produced.retain(|_, produced| produced.is_pending(applied));
    }

    /// Look up every page `action` names, preferring results not yet applied
    /// by the controller.
    fn resolve(&self, action: &Action) -> Result<Vec<Page>> {
        let table = self.table.read().unwrap_or_else(|poisoned| poisoned.into_inner());
        action
            .pages()
            .into_iter()
            .map(|id| {
                let page = self
                    .produced
                    .get(&id)
                    .map(|produced| produced.page.clone())
                    .or_else(|| table.get(&id).cloned())
                    .ok_or(ScanwerkError::PageNotFound(id))?;
                if !page.file_exists() {
                    return Err(ScanwerkError::PageGone {
                        page: id,
                        action: action.name().to_string(),
                    });
                }
                Ok(page)
            })
            .collect()
    }

    fn record(&mut self, emitted: Vec<(u64, Page)>) {
        for (sequence, page) in emitted {
            self.sequence = self.sequence.max(sequence);
            self.produced.insert(page.id, Produced { sequence, page });
        }
    }
}

fn error_response(page: Option<PageId>, action: &Action, err: &ScanwerkError) -> ResponseKind {
    ResponseKind::Error {
        page,
        action: action.name(),
        message: err.to_string(),
        kind: err.kind(),
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "handler panicked".to_string()
    }
}

/// The controller's end of the worker: request sender, response receiver
/// and the thread itself.
pub struct WorkerHandle {
    requests: Option<UnboundedSender<Request>>,
    responses: UnboundedReceiver<Response>,
    thread: Option<JoinHandle<()>>,
    cancel: Arc<AtomicBool>,
    processes: ProcessRegistry,
    applied: Arc<AtomicU64>,
}

impl WorkerHandle {
    pub fn send(&self, request: Request) -> Result<()> {
        self.requests
            .as_ref()
            .ok_or(ScanwerkError::WorkerGone)?
            .send(request)
            .map_err(|_| ScanwerkError::WorkerGone)
    }

    /// Next response, without blocking.
    pub fn try_recv(&mut self) -> Option<Response> {
        match self.responses.try_recv() {
            Ok(response) => Some(response),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => {
                debug!("response channel closed");
                None
            }
        }
    }

    /// Acknowledge that the page with `sequence` is in the collection.
    ///
    /// Call only after the page table has been updated.
    pub fn mark_applied(&self, sequence: u64) {
        self.applied.fetch_max(sequence, Ordering::SeqCst);
    }

    pub fn cancel_flag(&self) -> &AtomicBool {
        &self.cancel
    }

    pub fn processes(&self) -> &ProcessRegistry {
        &self.processes
    }

    /// Stop the worker: cancel whatever runs, close the queue and join.
    pub fn shutdown(&mut self) {
        let Some(thread) = self.thread.take() else {
            return;
        };
        self.cancel.store(true, Ordering::SeqCst);
        self.processes.kill_all(|pid| debug!(pid, "killed delegate on shutdown"));
        self.requests = None;
        if thread.join().is_err() {
            error!("worker thread panicked");
        }
    }
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scanwerk_core::types::Resolution;

    fn page(dir: &std::path::Path, name: &str) -> Page {
        let path = dir.join(name);
        std::fs::write(&path, b"x").unwrap();
        Page::new(path, 10, 10, Resolution::default())
    }

    #[test]
    fn produced_page_is_pending_until_acknowledged() {
        let dir = tempfile::tempdir().unwrap();
        let produced = Produced {
            sequence: 3,
            page: page(dir.path(), "a.png"),
        };
        assert!(produced.is_pending(2));
        assert!(!produced.is_pending(3));
        assert!(!produced.is_pending(7));
    }

    #[test]
    fn later_emission_supersedes_earlier_one() {
        let dir = tempfile::tempdir().unwrap();
        let (responses, _rx) = mpsc::unbounded_channel();
        let mut worker = Worker {
            config: EngineConfig::default(),
            session_dir: dir.path().to_path_buf(),
            table: PageTable::default(),
            cancel: Arc::new(AtomicBool::new(false)),
            processes: ProcessRegistry::new(),
            responses,
            produced: HashMap::new(),
            sequence: 0,
            applied: Arc::new(AtomicU64::new(0)),
        };
        let first = page(dir.path(), "a.png");
        let second = first.derive(dir.path().join("b.png"), 10, 10);
        std::fs::write(&second.filename, b"x").unwrap();
        worker.record(vec![(1, first.clone()), (2, second.clone())]);
        assert_eq!(worker.sequence, 2);

        worker.applied.store(1, Ordering::SeqCst);
        worker.prune();
        let action = Action::Negate { page: first.id };
        assert_eq!(worker.resolve(&action).unwrap()[0].filename, second.filename);

        worker.applied.store(2, Ordering::SeqCst);
        worker.prune();
        assert!(matches!(worker.resolve(&action), Err(ScanwerkError::PageNotFound(_))));
    }

    #[test]
    fn panic_payloads_become_messages() {
        let payload = panic::catch_unwind(|| panic!("bad pixel")).unwrap_err();
        assert_eq!(panic_message(payload.as_ref()), "bad pixel");
        let payload = panic::catch_unwind(|| panic!("{} pixels", 3)).unwrap_err();
        assert_eq!(panic_message(payload.as_ref()), "3 pixels");
    }
}
