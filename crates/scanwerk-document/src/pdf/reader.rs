// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// PDF reader — inspect existing PDF documents with the `lopdf` crate.

use std::path::Path;

use lopdf::{Dictionary, Document, Object, ObjectId};
use scanwerk_core::error::{Result, ScanwerkError};
use tracing::{debug, instrument};

/// Read-only view of an existing PDF.
pub struct PdfReader {
    document: Document,
}

impl PdfReader {
    // -- Construction ---------------------------------------------------------

    /// Open a PDF from the filesystem.
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path_ref = path.as_ref();
        let document = Document::load(path_ref).map_err(|err| {
            ScanwerkError::PdfError(format!("failed to open {}: {}", path_ref.display(), err))
        })?;
        debug!(pages = document.get_pages().len(), "PDF loaded");
        Ok(Self { document })
    }

    /// Create a reader from raw PDF bytes already in memory.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let document = Document::load_mem(data).map_err(|err| {
            ScanwerkError::PdfError(format!("failed to load PDF from memory: {}", err))
        })?;
        Ok(Self { document })
    }

    // -- Inspection -----------------------------------------------------------

    pub fn page_count(&self) -> usize {
        self.document.get_pages().len()
    }

    /// Width and height of every page in points, from its (possibly
    /// inherited) `MediaBox`.
    pub fn page_sizes(&self) -> Vec<Option<(f64, f64)>> {
        self.document
            .get_pages()
            .into_values()
            .map(|id| self.media_box(id))
            .collect()
    }

    fn media_box(&self, mut id: ObjectId) -> Option<(f64, f64)> {
        loop {
            let dict = self.document.get_dictionary(id).ok()?;
            if let Ok(media_box) = dict.get(b"MediaBox") {
                let values = self.resolve(media_box).as_array().ok()?;
                let n: Vec<f64> = values
                    .iter()
                    .filter_map(|v| match self.resolve(v) {
                        Object::Integer(i) => Some(*i as f64),
                        Object::Real(r) => Some(*r as f64),
                        _ => None,
                    })
                    .collect();
                return match n.as_slice() {
                    [x1, y1, x2, y2] => Some(((x2 - x1).abs(), (y2 - y1).abs())),
                    _ => None,
                };
            }
            id = dict.get(b"Parent").ok()?.as_reference().ok()?;
        }
    }

    fn resolve<'a>(&'a self, object: &'a Object) -> &'a Object {
        match object {
            Object::Reference(id) => self.document.get_object(*id).unwrap_or(object),
            _ => object,
        }
    }

    /// A text entry of the document information dictionary.
    pub fn info_string(&self, key: &str) -> Option<String> {
        match self.info()?.get(key.as_bytes()).ok()? {
            Object::String(bytes, _) => Some(String::from_utf8_lossy(bytes).into_owned()),
            _ => None,
        }
    }

    fn info(&self) -> Option<&Dictionary> {
        match self.document.trailer.get(b"Info").ok()? {
            Object::Reference(id) => self.document.get_dictionary(*id).ok(),
            Object::Dictionary(dict) => Some(dict),
            _ => None,
        }
    }
}
