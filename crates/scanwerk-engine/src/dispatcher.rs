// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Callback dispatcher: per-request callbacks fired as responses arrive.

use std::collections::HashMap;

use scanwerk_core::error::ErrorKind;
use scanwerk_core::types::{Page, PageId};
use tracing::{debug, warn};

use crate::request::{RequestId, Response, ResponseKind};

/// Queue position reported with lifecycle callbacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobStatus {
    pub token: RequestId,
    pub jobs_completed: usize,
    pub jobs_total: usize,
}

/// A `running` update.
#[derive(Debug, Clone, PartialEq)]
pub struct Progress {
    pub status: JobStatus,
    pub fraction: Option<f64>,
    pub message: Option<String>,
}

/// What the `error` callback receives.
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorReport {
    pub status: JobStatus,
    pub page: Option<PageId>,
    pub action: &'static str,
    pub message: String,
    pub kind: ErrorKind,
}

type Once<T> = Option<Box<dyn FnOnce(&T)>>;
type Many<T> = Option<Box<dyn FnMut(&T)>>;

/// Optional callbacks for one request.
///
/// `queued`, `running` and `display` may fire many times; the rest fire at
/// most once and are dropped afterwards.
#[derive(Default)]
pub struct Callbacks {
    queued: Many<JobStatus>,
    started: Once<JobStatus>,
    running: Many<Progress>,
    display: Many<Page>,
    error: Once<ErrorReport>,
    finished: Once<JobStatus>,
    cancelled: Once<JobStatus>,
    mark_saved: Option<Box<dyn FnOnce(&[PageId])>>,
}

impl Callbacks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_queued(mut self, f: impl FnMut(&JobStatus) + 'static) -> Self {
        self.queued = Some(Box::new(f));
        self
    }

    pub fn on_started(mut self, f: impl FnOnce(&JobStatus) + 'static) -> Self {
        self.started = Some(Box::new(f));
        self
    }

    pub fn on_running(mut self, f: impl FnMut(&Progress) + 'static) -> Self {
        self.running = Some(Box::new(f));
        self
    }

    /// Called with every page the request adds or replaces.
    pub fn on_display(mut self, f: impl FnMut(&Page) + 'static) -> Self {
        self.display = Some(Box::new(f));
        self
    }

    pub fn on_error(mut self, f: impl FnOnce(&ErrorReport) + 'static) -> Self {
        self.error = Some(Box::new(f));
        self
    }

    pub fn on_finished(mut self, f: impl FnOnce(&JobStatus) + 'static) -> Self {
        self.finished = Some(Box::new(f));
        self
    }

    pub fn on_cancelled(mut self, f: impl FnOnce(&JobStatus) + 'static) -> Self {
        self.cancelled = Some(Box::new(f));
        self
    }

    /// Called with the pages an export wrote, before `finished`.
    pub fn on_mark_saved(mut self, f: impl FnOnce(&[PageId]) + 'static) -> Self {
        self.mark_saved = Some(Box::new(f));
        self
    }
}

impl std::fmt::Debug for Callbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Callbacks")
            .field("queued", &self.queued.is_some())
            .field("started", &self.started.is_some())
            .field("running", &self.running.is_some())
            .field("display", &self.display.is_some())
            .field("error", &self.error.is_some())
            .field("finished", &self.finished.is_some())
            .field("cancelled", &self.cancelled.is_some())
            .field("mark_saved", &self.mark_saved.is_some())
            .finish()
    }
}

/// Callback sets by request, plus the queue counters.
#[derive(Debug, Default)]
pub struct Dispatcher {
    callbacks: HashMap<RequestId, Callbacks>,
    /// Requests whose results could not be applied; their terminal response
    /// is reported as this error instead.
    failures: HashMap<RequestId, ErrorReport>,
    jobs_completed: usize,
    jobs_total: usize,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// `(jobs_completed, jobs_total)`.
    pub fn counts(&self) -> (usize, usize) {
        (self.jobs_completed, self.jobs_total)
    }

    /// Requests still awaiting a terminal response.
    pub fn pending(&self) -> usize {
        self.callbacks.len()
    }

    pub fn is_pending(&self, token: RequestId) -> bool {
        self.callbacks.contains_key(&token)
    }

    fn status(&self, token: RequestId) -> JobStatus {
        JobStatus {
            token,
            jobs_completed: self.jobs_completed,
            jobs_total: self.jobs_total,
        }
    }

    /// Track a newly submitted request and fire its `queued` callback.
    pub fn register(&mut self, token: RequestId, callbacks: Callbacks) {
        self.jobs_total += 1;
        self.callbacks.insert(token, callbacks);
        self.handle(&Response::new(token, ResponseKind::Queued));
    }

    /// Fire the callbacks a response calls for.
    pub fn handle(&mut self, response: &Response) {
        let token = response.token;
        let Some(callbacks) = self.callbacks.get_mut(&token) else {
            debug!(token = %token, "response for unknown request");
            return;
        };
        let status = JobStatus {
            token,
            jobs_completed: self.jobs_completed + usize::from(response.kind.is_terminal()),
            jobs_total: self.jobs_total,
        };

        match &response.kind {
            ResponseKind::Queued => {
                if let Some(f) = callbacks.queued.as_mut() {
                    f(&status);
                }
            }
            ResponseKind::Started => {
                if let Some(f) = callbacks.started.take() {
                    f(&status);
                }
            }
            ResponseKind::Running { progress, message } => {
                if let Some(f) = callbacks.running.as_mut() {
                    f(&Progress {
                        status,
                        fraction: *progress,
                        message: message.clone(),
                    });
                }
            }
            ResponseKind::Page { page, .. } => {
                if let Some(f) = callbacks.display.as_mut() {
                    f(page.as_ref());
                }
            }
            ResponseKind::Error {
                page,
                action,
                message,
                kind,
            } => {
                let report = ErrorReport {
                    status,
                    page: *page,
                    action: *action,
                    message: message.clone(),
                    kind: *kind,
                };
                self.finish(token, |callbacks| fire_error(callbacks, &report));
            }
            ResponseKind::Finished { saved } => match self.failures.remove(&token) {
                Some(mut report) => {
                    report.status = status;
                    self.finish(token, |callbacks| fire_error(callbacks, &report));
                }
                None => self.finish(token, |callbacks| {
                    if !saved.is_empty()
                        && let Some(f) = callbacks.mark_saved.take()
                    {
                        f(saved);
                    }
                    if let Some(f) = callbacks.finished.take() {
                        f(&status);
                    }
                }),
            },
            ResponseKind::Cancelled => {
                self.finish(token, |callbacks| {
                    if let Some(f) = callbacks.cancelled.take() {
                        f(&status);
                    }
                });
            }
        }
    }

    /// Record an error the controller hit while applying a response. The
    /// request stays pending and ends with this error in place of `finished`.
    pub fn report(&mut self, token: RequestId, page: Option<PageId>, action: &'static str, message: String, kind: ErrorKind) {
        if !self.is_pending(token) {
            warn!(token = %token, action, message = %message, "error for unknown request");
            return;
        }
        let report = ErrorReport {
            status: self.status(token),
            page,
            action,
            message,
            kind,
        };
        match self.failures.get(&token) {
            Some(first) => debug!(token = %token, first = %first.message, "request already failed"),
            None => {
                self.failures.insert(token, report);
            }
        }
    }

    /// Treat `token` as complete without firing anything, for an error the
    /// user chose not to see again.
    pub fn dismiss(&mut self, token: RequestId) {
        self.finish(token, |_| {});
    }

    /// Drop the callbacks for `token` after running `fire` on them, and
    /// reset the counters once nothing is pending.
    fn finish(&mut self, token: RequestId, fire: impl FnOnce(&mut Callbacks)) {
        self.failures.remove(&token);
        let Some(mut callbacks) = self.callbacks.remove(&token) else {
            return;
        };
        self.jobs_completed += 1;
        fire(&mut callbacks);
        if self.callbacks.is_empty() {
            debug!(completed = self.jobs_completed, "queue drained");
            self.jobs_completed = 0;
            self.jobs_total = 0;
        }
    }
}

fn fire_error(callbacks: &mut Callbacks, report: &ErrorReport) {
    match callbacks.error.take() {
        Some(f) => f(report),
        None => warn!(token = %report.status.token, action = report.action, message = %report.message, "unhandled request error"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn log() -> Rc<RefCell<Vec<String>>> {
        Rc::new(RefCell::new(Vec::new()))
    }

    fn recording(log: &Rc<RefCell<Vec<String>>>) -> Callbacks {
        let (a, b, c, d, e, f, g) = (
            log.clone(),
            log.clone(),
            log.clone(),
            log.clone(),
            log.clone(),
            log.clone(),
            log.clone(),
        );
        Callbacks::new()
            .on_queued(move |s| a.borrow_mut().push(format!("queued {}/{}", s.jobs_completed, s.jobs_total)))
            .on_started(move |_| b.borrow_mut().push("started".into()))
            .on_running(move |p| c.borrow_mut().push(format!("running {:?}", p.fraction)))
            .on_error(move |r| d.borrow_mut().push(format!("error {}", r.message)))
            .on_finished(move |_| e.borrow_mut().push("finished".into()))
            .on_cancelled(move |_| f.borrow_mut().push("cancelled".into()))
            .on_mark_saved(move |ids| g.borrow_mut().push(format!("saved {}", ids.len())))
    }

    #[test]
    fn lifecycle_fires_in_order() {
        let log = log();
        let mut dispatcher = Dispatcher::new();
        let token = RequestId::new();
        dispatcher.register(token, recording(&log));
        dispatcher.handle(&Response::new(token, ResponseKind::Started));
        for fraction in [0.0, 0.5] {
            dispatcher.handle(&Response::new(
                token,
                ResponseKind::Running {
                    progress: Some(fraction),
                    message: None,
                },
            ));
        }
        dispatcher.handle(&Response::new(
            token,
            ResponseKind::Finished {
                saved: vec![PageId::new()],
            },
        ));
        assert_eq!(
            *log.borrow(),
            vec![
                "queued 0/1",
                "started",
                "running Some(0.0)",
                "running Some(0.5)",
                "saved 1",
                "finished"
            ]
        );
        assert!(!dispatcher.is_pending(token));
    }

    #[test]
    fn one_shot_callbacks_fire_once() {
        let log = log();
        let mut dispatcher = Dispatcher::new();
        let token = RequestId::new();
        dispatcher.register(token, recording(&log));
        dispatcher.handle(&Response::new(token, ResponseKind::Started));
        dispatcher.handle(&Response::new(token, ResponseKind::Started));
        dispatcher.handle(&Response::new(token, ResponseKind::Cancelled));
        dispatcher.handle(&Response::new(token, ResponseKind::Cancelled));
        let started = log.borrow().iter().filter(|l| *l == "started").count();
        let cancelled = log.borrow().iter().filter(|l| *l == "cancelled").count();
        assert_eq!((started, cancelled), (1, 1));
    }

    #[test]
    fn counters_reset_when_queue_drains() {
        let mut dispatcher = Dispatcher::new();
        let first = RequestId::new();
        let second = RequestId::new();
        dispatcher.register(first, Callbacks::new());
        dispatcher.register(second, Callbacks::new());
        assert_eq!(dispatcher.counts(), (0, 2));

        dispatcher.handle(&Response::new(first, ResponseKind::Finished { saved: vec![] }));
        assert_eq!(dispatcher.counts(), (1, 2));

        dispatcher.handle(&Response::new(
            second,
            ResponseKind::Error {
                page: None,
                action: "rotate",
                message: "boom".into(),
                kind: ErrorKind::DelegateFailure,
            },
        ));
        assert_eq!(dispatcher.counts(), (0, 0));
        assert_eq!(dispatcher.pending(), 0);
    }

    #[test]
    fn failed_results_end_with_one_error() {
        let log = log();
        let mut dispatcher = Dispatcher::new();
        let token = RequestId::new();
        dispatcher.register(token, recording(&log));
        dispatcher.report(token, None, "rotate", "gone".into(), ErrorKind::ReferenceNotFound);
        dispatcher.report(token, None, "rotate", "again".into(), ErrorKind::ReferenceNotFound);
        assert!(dispatcher.is_pending(token));
        assert!(!log.borrow().iter().any(|l| l.starts_with("error")));

        dispatcher.handle(&Response::new(token, ResponseKind::Finished { saved: vec![] }));
        assert_eq!(*log.borrow(), vec!["queued 0/1", "error gone"]);
        assert!(!dispatcher.is_pending(token));
    }

    #[test]
    fn stray_terminal_responses_are_not_counted() {
        let mut dispatcher = Dispatcher::new();
        let first = RequestId::new();
        let second = RequestId::new();
        dispatcher.register(first, Callbacks::new());
        dispatcher.register(second, Callbacks::new());
        dispatcher.handle(&Response::new(first, ResponseKind::Finished { saved: vec![] }));
        dispatcher.handle(&Response::new(first, ResponseKind::Finished { saved: vec![] }));
        dispatcher.handle(&Response::new(RequestId::new(), ResponseKind::Cancelled));
        assert_eq!(dispatcher.counts(), (1, 2));
    }
}
