// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// scanwerk-engine — the asynchronous page-processing engine.
//
// The controller (`Document`) owns the page collection and queues requests
// to a single worker thread, which resolves page identities, runs the
// operation handlers and streams responses back for `poll` to apply.

pub mod collection;
pub mod dispatcher;
pub mod document;
pub mod handlers;
pub mod process;
pub mod request;
pub mod session;
pub mod store;
pub mod worker;

pub use collection::{PageCollection, PageRow, PageTable, PagesPossible};
pub use dispatcher::{Callbacks, Dispatcher, ErrorReport, JobStatus, Progress};
pub use document::Document;
pub use process::{ProcessRegistry, find_executable};
pub use request::{Action, ExportTarget, OcrBackend, Request, RequestId, Response, ResponseKind, TiffCompression};
pub use session::{CrashedSession, Session, crashed_sessions, delete_session};
pub use store::SessionStore;
pub use worker::{Worker, WorkerHandle};
