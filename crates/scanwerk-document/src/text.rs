// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Multi-page text and hOCR documents assembled from per-page text layers.

use scanwerk_core::bbox::{BboxTree, hocr_body, hocr_header};

/// Concatenated plain text of every page. Pages without a layer add nothing.
pub fn assemble_text<'a>(layers: impl IntoIterator<Item = Option<&'a BboxTree>>) -> String {
    layers
        .into_iter()
        .flatten()
        .map(BboxTree::to_text)
        .collect()
}

/// A single hOCR document holding the body of every page that has a layer.
///
/// Returns `None` when no page has a text layer.
pub fn assemble_hocr<'a>(layers: impl IntoIterator<Item = Option<&'a BboxTree>>) -> Option<String> {
    let mut out: Option<String> = None;
    for layer in layers.into_iter().flatten() {
        let page = layer.to_hocr();
        let Some(body) = hocr_body(&page) else {
            continue;
        };
        out.get_or_insert_with(hocr_header).push_str(body);
    }
    out.map(|mut doc| {
        doc.push_str("</body>\n</html>\n");
        doc
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_skips_pages_without_layer() {
        let a = BboxTree::from_text("first", 10, 10);
        let b = BboxTree::from_text("second", 10, 10);
        assert_eq!(assemble_text([Some(&a), None, Some(&b)]), "firstsecond");
    }

    #[test]
    fn hocr_shares_one_header_and_footer() {
        let a = BboxTree::from_text("alpha", 10, 10);
        let b = BboxTree::from_text("beta", 10, 10);
        let doc = assemble_hocr([Some(&a), Some(&b)]).unwrap();
        assert_eq!(doc.matches("<body>").count(), 1);
        assert_eq!(doc.matches("</body>").count(), 1);
        assert_eq!(doc.matches("class='ocr_page'").count(), 2);
        assert!(doc.ends_with("</body>\n</html>\n"));
        let reparsed = BboxTree::from_hocr(&doc).unwrap();
        assert_eq!(reparsed.to_text(), "alpha");
    }

    #[test]
    fn hocr_without_any_layer_is_none() {
        assert!(assemble_hocr([None, None]).is_none());
    }
}
