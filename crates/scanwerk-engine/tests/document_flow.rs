// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// End-to-end tests: requests go through the real worker thread and come back
// through `Document::poll`.

use std::cell::RefCell;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::time::Duration;

use image::{DynamicImage, GrayImage, Luma};
use scanwerk_core::bbox::BboxTree;
use scanwerk_core::config::EngineConfig;
use scanwerk_core::error::{ErrorKind, ScanwerkError};
use scanwerk_core::types::{PageId, PageRef};
use scanwerk_document::{ImageProcessor, SplitDirection};
use scanwerk_engine::{Callbacks, Document, ErrorReport, ExportTarget, Session, crashed_sessions};

const TIMEOUT: Duration = Duration::from_secs(30);

fn config(root: &Path) -> EngineConfig {
    EngineConfig {
        scratch_root: root.to_path_buf(),
        poll_interval_ms: 5,
        ..EngineConfig::default()
    }
}

/// A grey gradient PNG of the given size.
fn png(dir: &Path, name: &str, width: u32, height: u32) -> PathBuf {
    let path = dir.join(name);
    let image = GrayImage::from_fn(width, height, |x, _| Luma([(x * 255 / width.max(1)) as u8]));
    DynamicImage::ImageLuma8(image).save(&path).unwrap();
    path
}

fn import(document: &mut Document, paths: Vec<PathBuf>) -> Vec<PageId> {
    document
        .import_files(paths, PageRef::Append, Callbacks::new())
        .unwrap();
    assert!(document.wait_idle(TIMEOUT));
    document.pages().page_ids()
}

#[test]
fn imported_pages_are_numbered_in_order() {
    let scratch = tempfile::tempdir().unwrap();
    let inputs = tempfile::tempdir().unwrap();
    let mut document = Document::new(config(scratch.path())).unwrap();

    let displayed = Rc::new(RefCell::new(0));
    let counter = displayed.clone();
    document
        .import_files(
            vec![png(inputs.path(), "a.png", 20, 10), png(inputs.path(), "b.png", 30, 10)],
            PageRef::Append,
            Callbacks::new().on_display(move |_| *counter.borrow_mut() += 1),
        )
        .unwrap();
    assert!(document.wait_idle(TIMEOUT));

    let rows = document.pages().rows();
    assert_eq!(rows.len(), 2);
    assert_eq!((rows[0].number, rows[0].page.width), (1, 20));
    assert_eq!((rows[1].number, rows[1].page.width), (2, 30));
    assert!(rows[0].page.filename.starts_with(document.session().dir()));
    assert_eq!(*displayed.borrow(), 2);
}

#[test]
fn started_callbacks_fire_in_submission_order() {
    let scratch = tempfile::tempdir().unwrap();
    let inputs = tempfile::tempdir().unwrap();
    let mut document = Document::new(config(scratch.path())).unwrap();
    let ids = import(&mut document, vec![png(inputs.path(), "a.png", 16, 16)]);

    let order = Rc::new(RefCell::new(Vec::new()));
    for (i, angle) in [90, 180, 270, 90].into_iter().enumerate() {
        let order = order.clone();
        document
            .rotate(ids[0], angle, Callbacks::new().on_started(move |_| order.borrow_mut().push(i)))
            .unwrap();
    }
    assert!(document.wait_idle(TIMEOUT));
    assert_eq!(*order.borrow(), vec![0, 1, 2, 3]);
    assert_eq!(document.counts(), (0, 0));
}

#[test]
fn split_replaces_and_inserts_after() {
    let scratch = tempfile::tempdir().unwrap();
    let inputs = tempfile::tempdir().unwrap();
    let mut document = Document::new(config(scratch.path())).unwrap();
    let ids = import(
        &mut document,
        vec![png(inputs.path(), "wide.png", 200, 100), png(inputs.path(), "next.png", 10, 10)],
    );
    let original = ids[0];

    document
        .split(original, SplitDirection::Vertical, 100, Callbacks::new())
        .unwrap();
    assert!(document.wait_idle(TIMEOUT));

    let rows = document.pages().rows();
    assert_eq!(rows.len(), 3);
    assert_eq!(rows[0].page.id, original);
    assert_eq!((rows[0].page.width, rows[0].page.height), (100, 100));
    assert_ne!(rows[1].page.id, original);
    assert_eq!((rows[1].page.width, rows[1].page.height), (100, 100));
    assert_eq!(rows[2].page.id, ids[1]);
    let numbers: Vec<u32> = rows.iter().map(|row| row.number).collect();
    assert_eq!(numbers, vec![1, 2, 3]);
}

#[test]
fn chained_requests_see_unapplied_results() {
    let scratch = tempfile::tempdir().unwrap();
    let inputs = tempfile::tempdir().unwrap();
    let mut document = Document::new(config(scratch.path())).unwrap();
    let ids = import(&mut document, vec![png(inputs.path(), "a.png", 200, 100)]);

    // No poll between the two: the threshold must work on the rotated page.
    document.rotate(ids[0], 90, Callbacks::new()).unwrap();
    document.threshold(ids[0], 50.0, Callbacks::new()).unwrap();
    assert!(document.wait_idle(TIMEOUT));

    let page = document.pages().get(ids[0]).unwrap();
    assert_eq!((page.width, page.height), (100, 200));
    assert!(ImageProcessor::open(&page.filename).unwrap().is_bilevel());
}

#[test]
fn deleted_backing_file_is_reference_not_found() {
    let scratch = tempfile::tempdir().unwrap();
    let inputs = tempfile::tempdir().unwrap();
    let mut document = Document::new(config(scratch.path())).unwrap();
    let ids = import(&mut document, vec![png(inputs.path(), "a.png", 10, 10)]);
    std::fs::remove_file(&document.pages().get(ids[0]).unwrap().filename).unwrap();

    let report: Rc<RefCell<Option<ErrorReport>>> = Rc::default();
    let slot = report.clone();
    document
        .negate(ids[0], Callbacks::new().on_error(move |r| *slot.borrow_mut() = Some(r.clone())))
        .unwrap();
    assert!(document.wait_idle(TIMEOUT));

    let report = report.borrow().clone().expect("error callback fired");
    assert_eq!(report.kind, ErrorKind::ReferenceNotFound);
    assert_eq!(report.page, Some(ids[0]));
    assert_eq!(report.action, "negate");
    assert!(report.message.contains("no longer exists"), "{}", report.message);
}

#[test]
fn ignored_errors_complete_silently() {
    let scratch = tempfile::tempdir().unwrap();
    let inputs = tempfile::tempdir().unwrap();
    let mut document = Document::new(config(scratch.path())).unwrap();
    let ids = import(&mut document, vec![png(inputs.path(), "a.png", 10, 10)]);
    std::fs::remove_file(&document.pages().get(ids[0]).unwrap().filename).unwrap();

    let first: Rc<RefCell<Option<String>>> = Rc::default();
    let slot = first.clone();
    document
        .negate(ids[0], Callbacks::new().on_error(move |r| *slot.borrow_mut() = Some(r.message.clone())))
        .unwrap();
    assert!(document.wait_idle(TIMEOUT));
    let message = first.borrow().clone().expect("first error shown");
    document.ignore_errors_like(&message);

    let shown = Rc::new(RefCell::new(false));
    let flag = shown.clone();
    document
        .negate(ids[0], Callbacks::new().on_error(move |_| *flag.borrow_mut() = true))
        .unwrap();
    assert!(document.wait_idle(TIMEOUT));
    assert!(!*shown.borrow());
    assert!(document.is_idle());
}

#[test]
fn unknown_pages_are_rejected_at_submission() {
    let scratch = tempfile::tempdir().unwrap();
    let mut document = Document::new(config(scratch.path())).unwrap();
    let missing = PageId::new();
    assert!(matches!(
        document.rotate(missing, 90, Callbacks::new()),
        Err(ScanwerkError::PageNotFound(id)) if id == missing
    ));
    assert!(document.is_idle());
}

#[test]
fn text_export_marks_pages_saved() {
    let scratch = tempfile::tempdir().unwrap();
    let inputs = tempfile::tempdir().unwrap();
    let mut document = Document::new(config(scratch.path())).unwrap();
    let ids = import(&mut document, vec![png(inputs.path(), "a.png", 40, 20)]);

    let mut page = document.pages().get(ids[0]).unwrap().clone();
    page.text_layer = Some(BboxTree::from_text("hello world", 40, 20));
    document
        .pages_mut()
        .add_page(PageRef::Replace(ids[0]), page)
        .unwrap();

    let text = inputs.path().join("out.txt");
    let hocr = inputs.path().join("out.hocr");
    let saved = Rc::new(RefCell::new(Vec::new()));
    let record = saved.clone();
    document
        .save_text(
            ids.clone(),
            ExportTarget::new(&text),
            Callbacks::new().on_mark_saved(move |pages| record.borrow_mut().extend_from_slice(pages)),
        )
        .unwrap();
    document
        .save_hocr(ids.clone(), ExportTarget::new(&hocr), Callbacks::new())
        .unwrap();
    assert!(document.wait_idle(TIMEOUT));

    assert!(std::fs::read_to_string(&text).unwrap().contains("hello world"));
    let hocr = std::fs::read_to_string(&hocr).unwrap();
    assert!(hocr.contains("hello world"));
    assert!(hocr.ends_with("</html>\n"));
    assert_eq!(*saved.borrow(), ids);
    assert!(document.pages().get(ids[0]).unwrap().saved);
}

#[test]
fn undo_restores_identity_number_and_order() {
    let scratch = tempfile::tempdir().unwrap();
    let inputs = tempfile::tempdir().unwrap();
    let mut document = Document::new(config(scratch.path())).unwrap();
    let ids = import(
        &mut document,
        vec![
            png(inputs.path(), "a.png", 10, 10),
            png(inputs.path(), "b.png", 10, 10),
            png(inputs.path(), "c.png", 10, 10),
        ],
    );
    let before: Vec<(u32, PageId)> = document
        .pages()
        .rows()
        .iter()
        .map(|row| (row.number, row.page.id))
        .collect();

    document.pages_mut().select(&[1]);
    assert_eq!(document.delete_selection(), 1);
    assert_eq!(document.pages().len(), 2);

    assert!(document.undo());
    let after: Vec<(u32, PageId)> = document
        .pages()
        .rows()
        .iter()
        .map(|row| (row.number, row.page.id))
        .collect();
    assert_eq!(after, before);
    assert_eq!(document.pages().page_ids(), ids);
}

#[test]
fn saved_session_is_restorable_after_a_crash() {
    let scratch = tempfile::tempdir().unwrap();
    let inputs = tempfile::tempdir().unwrap();
    let mut session = Session::create(scratch.path()).unwrap();
    session.keep();
    let dir = session.dir().to_path_buf();

    let ids = {
        let mut document = Document::with_session(config(scratch.path()), session).unwrap();
        let ids = import(&mut document, vec![png(inputs.path(), "a.png", 10, 10)]);
        document.save_session().unwrap();
        ids
    };

    let crashed = crashed_sessions(scratch.path()).unwrap();
    assert_eq!(crashed.len(), 1);
    assert_eq!(crashed[0].dir, dir);
    assert!(crashed[0].restorable);

    let document = Document::restore(config(scratch.path()), &dir).unwrap();
    assert_eq!(document.pages().page_ids(), ids);
    assert!(document.pages().get(ids[0]).unwrap().file_exists());
}

#[cfg(unix)]
#[test]
fn cancel_answers_every_queued_request_once() {
    use std::time::Instant;

    let scratch = tempfile::tempdir().unwrap();
    let inputs = tempfile::tempdir().unwrap();
    let mut document = Document::new(config(scratch.path())).unwrap();
    let ids = import(&mut document, vec![png(inputs.path(), "a.png", 10, 10)]);

    let events = Rc::new(RefCell::new(Vec::<(usize, &'static str)>::new()));
    for i in 0..5 {
        let (started, finished, cancelled, failed) =
            (events.clone(), events.clone(), events.clone(), events.clone());
        document
            .user_defined(
                ids[0],
                "sleep 30; true",
                Callbacks::new()
                    .on_started(move |_| started.borrow_mut().push((i, "started")))
                    .on_finished(move |_| finished.borrow_mut().push((i, "finished")))
                    .on_cancelled(move |_| cancelled.borrow_mut().push((i, "cancelled")))
                    .on_error(move |_| failed.borrow_mut().push((i, "error"))),
            )
            .unwrap();
    }

    let deadline = Instant::now() + TIMEOUT;
    while !events.borrow().contains(&(0, "started")) {
        assert!(Instant::now() < deadline, "first request never started");
        document.poll();
        std::thread::sleep(Duration::from_millis(5));
    }
    // Give the delegate time to register before killing it.
    std::thread::sleep(Duration::from_millis(100));

    let acknowledged = Rc::new(RefCell::new(false));
    let ack = acknowledged.clone();
    let mut killed = Vec::new();
    let cancelled_at = Instant::now();
    document
        .cancel(move |_| *ack.borrow_mut() = true, |pid| killed.push(pid))
        .unwrap();
    assert!(document.wait_idle(TIMEOUT));
    assert!(*acknowledged.borrow());
    // The shell's own children die with it.
    assert!(
        cancelled_at.elapsed() < Duration::from_secs(10),
        "cancel took {:?}",
        cancelled_at.elapsed()
    );

    let events = events.borrow();
    for i in 1..5 {
        let answers: Vec<_> = events.iter().filter(|(j, _)| *j == i).collect();
        assert_eq!(answers, vec![&(i, "cancelled")], "request {i}");
    }
    let first: Vec<_> = events
        .iter()
        .filter(|(j, what)| *j == 0 && *what != "started")
        .collect();
    assert_eq!(first.len(), 1);
    assert!(matches!(first[0].1, "cancelled" | "finished"));
}

#[test]
fn undo_survives_the_next_operation() {
    let scratch = tempfile::tempdir().unwrap();
    let inputs = tempfile::tempdir().unwrap();
    let mut document = Document::new(config(scratch.path())).unwrap();
    let ids = import(&mut document, vec![png(inputs.path(), "a.png", 200, 100)]);

    document.rotate(ids[0], 90, Callbacks::new()).unwrap();
    assert!(document.wait_idle(TIMEOUT));
    let page = document.pages().get(ids[0]).unwrap();
    assert_eq!((page.width, page.height), (100, 200));

    assert!(document.undo());
    let page = document.pages().get(ids[0]).unwrap();
    assert_eq!((page.width, page.height), (200, 100));

    document.negate(ids[0], Callbacks::new()).unwrap();
    assert!(document.wait_idle(TIMEOUT));
    let page = document.pages().get(ids[0]).unwrap();
    assert_eq!((page.width, page.height), (200, 100));
}

#[cfg(unix)]
#[test]
fn page_deleted_in_flight_ends_with_a_single_error() {
    let scratch = tempfile::tempdir().unwrap();
    let inputs = tempfile::tempdir().unwrap();
    let mut document = Document::new(config(scratch.path())).unwrap();
    let ids = import(&mut document, vec![png(inputs.path(), "a.png", 10, 10)]);

    let terminal = Rc::new(RefCell::new(Vec::<&'static str>::new()));
    let (finished, failed, cancelled) = (terminal.clone(), terminal.clone(), terminal.clone());
    document
        .user_defined(
            ids[0],
            "sleep 1",
            Callbacks::new()
                .on_finished(move |_| finished.borrow_mut().push("finished"))
                .on_error(move |_| failed.borrow_mut().push("error"))
                .on_cancelled(move |_| cancelled.borrow_mut().push("cancelled")),
        )
        .unwrap();
    document.pages_mut().select(&[0]);
    assert_eq!(document.delete_selection(), 1);
    assert!(document.wait_idle(TIMEOUT));

    assert_eq!(*terminal.borrow(), vec!["error"]);
    assert!(document.pages().get(ids[0]).is_none());
}

#[test]
fn crop_past_the_edge_keeps_layers_aligned() {
    let scratch = tempfile::tempdir().unwrap();
    let inputs = tempfile::tempdir().unwrap();
    let mut document = Document::new(config(scratch.path())).unwrap();
    let ids = import(&mut document, vec![png(inputs.path(), "a.png", 40, 20)]);

    let mut page = document.pages().get(ids[0]).unwrap().clone();
    page.text_layer = Some(BboxTree::from_text("edge", 40, 20));
    document
        .pages_mut()
        .add_page(PageRef::Replace(ids[0]), page)
        .unwrap();

    document.crop(ids[0], (50, 0, 10, 20), Callbacks::new()).unwrap();
    assert!(document.wait_idle(TIMEOUT));

    let page = document.pages().get(ids[0]).unwrap();
    assert_eq!((page.width, page.height), (1, 20));
    let layer = page.text_layer.as_ref().expect("text layer kept");
    assert_eq!(layer.boxes()[0].bbox, [0, 0, 1, 20]);
}
