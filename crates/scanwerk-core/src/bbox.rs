// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Bounding-box trees for OCR text layers and annotations.
//
// A tree is stored flattened in document order, each box carrying its depth.
// hOCR is the interchange format; plain text and the DjVu text/annotation
// syntaxes are export-only.

use std::fmt::Write as _;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{Result, ScanwerkError};

/// Highlight colour for DjVu map areas.
pub const ANNOTATION_COLOR: &str = "cccf00";

const HOCR_CAPABILITIES: &str = "ocr_page ocr_carea ocr_par ocr_line ocr_word";

static TOKEN_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"<!--[\s\S]*?-->|<(/?)([A-Za-z][\w:-]*)([^>]*?)(/?)>|([^<]+)").expect("valid regex")
});
static ATTR_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"([\w:-]+)\s*=\s*(?:'([^']*)'|"([^"]*)")"#).expect("valid regex")
});
static BBOX_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\bbbox\s+(\d+)\s+(\d+)\s+(\d+)\s+(\d+)").expect("valid regex"));
static TEXTANGLE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\btextangle\s+(\d+)").expect("valid regex"));
static WCONF_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\bx_wconf\s+(-?\d+)").expect("valid regex"));
static BASELINE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\bbaseline\s+((?:-?\d+(?:\.\d+)?\s+)*-?\d+(?:\.\d+)?)").expect("valid regex")
});
static BODY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<body[^>]*>(.*)</body>").expect("valid regex"));

/// Structural class of a box.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BoxKind {
    Page,
    Header,
    Footer,
    Caption,
    Column,
    Para,
    Line,
    Word,
}

impl BoxKind {
    /// Parse the suffix of an hOCR class such as `ocr_par` or `ocrx_word`.
    fn from_hocr_class(class: &str) -> Option<Self> {
        let mut parts = class.split('_');
        let (_, suffix) = (parts.next()?, parts.next()?);
        if parts.next().is_some() {
            return None;
        }
        match suffix {
            "page" => Some(Self::Page),
            "header" => Some(Self::Header),
            "footer" => Some(Self::Footer),
            "caption" => Some(Self::Caption),
            "carea" | "column" => Some(Self::Column),
            "par" | "para" => Some(Self::Para),
            "line" => Some(Self::Line),
            "word" => Some(Self::Word),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Page => "page",
            Self::Header => "header",
            Self::Footer => "footer",
            Self::Caption => "caption",
            Self::Column => "column",
            Self::Para => "para",
            Self::Line => "line",
            Self::Word => "word",
        }
    }

    /// hOCR class and element name used when writing this kind.
    fn hocr_tag(&self) -> (&'static str, &'static str) {
        match self {
            Self::Page => ("ocr_page", "div"),
            Self::Column => ("ocr_carea", "div"),
            Self::Para => ("ocr_par", "p"),
            Self::Header => ("ocr_header", "span"),
            Self::Footer => ("ocr_footer", "span"),
            Self::Caption => ("ocr_caption", "span"),
            Self::Line => ("ocr_line", "span"),
            Self::Word => ("ocr_word", "span"),
        }
    }

    /// DjVu hidden-text only knows a subset of the hOCR kinds.
    fn djvu_kind(&self) -> &'static str {
        match self {
            Self::Page => "page",
            Self::Column => "column",
            Self::Para => "para",
            Self::Word => "word",
            Self::Line | Self::Header | Self::Footer | Self::Caption => "line",
        }
    }
}

/// One box of a text layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bbox {
    #[serde(rename = "type")]
    pub kind: BoxKind,
    /// `[x1, y1, x2, y2]` in pixels, origin top-left.
    pub bbox: [i64; 4],
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    pub depth: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub baseline: Option<Vec<f64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub textangle: Option<i64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub style: Vec<String>,
}

impl Bbox {
    pub fn new(kind: BoxKind, bbox: [i64; 4], depth: usize) -> Self {
        Self {
            kind,
            bbox,
            text: None,
            depth,
            id: None,
            confidence: None,
            baseline: None,
            textangle: None,
            style: Vec::new(),
        }
    }

    pub fn width(&self) -> i64 {
        self.bbox[2] - self.bbox[0]
    }

    pub fn height(&self) -> i64 {
        self.bbox[3] - self.bbox[1]
    }
}

/// Flattened tree of boxes in document order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BboxTree {
    boxes: Vec<Bbox>,
}

impl BboxTree {
    /// Wrap boxes that are already in document order with depths assigned.
    pub fn from_boxes(boxes: Vec<Bbox>) -> Self {
        Self { boxes }
    }

    /// A single page-sized box holding `text`.
    pub fn from_text(text: impl Into<String>, width: u32, height: u32) -> Self {
        let mut page = Bbox::new(BoxKind::Page, [0, 0, width as i64, height as i64], 0);
        page.text = Some(text.into());
        Self { boxes: vec![page] }
    }

    /// Parse the first page of an hOCR document.
    ///
    /// Boxes without text and without descendants carrying text are dropped.
    pub fn from_hocr(hocr: &str) -> Result<Self> {
        let body = BODY_RE
            .captures(hocr)
            .and_then(|c| c.get(1))
            .ok_or_else(|| ScanwerkError::OcrError("hOCR document has no <body>".into()))?;
        let mut parser = HocrParser::default();
        parser.feed(body.as_str());
        let mut tree = Self::default();
        if let Some(&root) = parser.roots.first() {
            if parser.prune(root) {
                parser.flatten(root, 0, &mut tree.boxes);
            }
        }
        Ok(tree)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn is_empty(&self) -> bool {
        self.boxes.is_empty()
    }

    pub fn boxes(&self) -> &[Bbox] {
        &self.boxes
    }

    pub fn iter(&self) -> impl Iterator<Item = &Bbox> {
        self.boxes.iter()
    }

    /// Whether the tree has a usable, non-degenerate page box.
    pub fn is_valid(&self) -> bool {
        match self.boxes.first() {
            Some(first) if first.kind == BoxKind::Page => first.bbox[2] != 0 && first.bbox[3] != 0,
            Some(_) => true,
            None => false,
        }
    }

    /// Plain text, one blank line between paragraphs.
    pub fn to_text(&self) -> String {
        let mut out = String::new();
        for bbox in &self.boxes {
            if !out.is_empty() && bbox.kind == BoxKind::Para {
                out.push_str("\n\n");
            }
            if let Some(text) = &bbox.text {
                out.push_str(text);
                out.push(' ');
            }
        }
        out.lines()
            .map(|line| line.trim_end_matches(' '))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Full hOCR document. Missing ids are generated from kind and position.
    pub fn to_hocr(&self) -> String {
        let mut out = hocr_header();
        out.push('\n');
        let mut open: Vec<(usize, &str)> = Vec::new();
        for (index, bbox) in self.boxes.iter().enumerate() {
            if open.last().is_some_and(|&(depth, _)| depth >= bbox.depth) {
                // The innermost element closes on the same line as its text.
                if let Some((_, tag)) = open.pop() {
                    let _ = writeln!(out, "</{tag}>");
                }
                while let Some(&(depth, tag)) = open.last() {
                    if depth < bbox.depth {
                        break;
                    }
                    open.pop();
                    let _ = writeln!(out, "{}</{tag}>", indent(depth));
                }
            } else if !open.is_empty() {
                out.push('\n');
            }

            let (class, tag) = bbox.kind.hocr_tag();
            let id = bbox
                .id
                .clone()
                .unwrap_or_else(|| format!("{}_{}", bbox.kind.as_str(), index + 1));
            let [x1, y1, x2, y2] = bbox.bbox;
            let _ = write!(
                out,
                "{}<{tag} class='{class}' id='{id}' title='bbox {x1} {y1} {x2} {y2}",
                indent(bbox.depth)
            );
            if let Some(baseline) = &bbox.baseline {
                let coefficients: Vec<String> = baseline.iter().map(|v| v.to_string()).collect();
                let _ = write!(out, "; baseline {}", coefficients.join(" "));
            }
            if let Some(angle) = bbox.textangle {
                let _ = write!(out, "; textangle {angle}");
            }
            if let Some(conf) = bbox.confidence {
                let _ = write!(out, "; x_wconf {conf}");
            }
            out.push_str("'>");
            if let Some(text) = &bbox.text {
                for style in &bbox.style {
                    let _ = write!(out, "<{style}>");
                }
                out.push_str(&escape_xml(text));
                for style in bbox.style.iter().rev() {
                    let _ = write!(out, "</{style}>");
                }
            }
            open.push((bbox.depth, tag));
        }
        if let Some((_, tag)) = open.pop() {
            let _ = writeln!(out, "</{tag}>");
        }
        while let Some((depth, tag)) = open.pop() {
            let _ = writeln!(out, "{}</{tag}>", indent(depth));
        }
        out.push_str(" </body>\n</html>\n");
        out
    }

    /// DjVu hidden-text s-expression, y-axis flipped to a bottom-left origin.
    pub fn to_djvu_txt(&self) -> String {
        let mut out = String::new();
        let mut prev_depth: Option<usize> = None;
        let mut height = self.boxes.first().map(|b| b.bbox[3]).unwrap_or_default();
        for bbox in &self.boxes {
            if let Some(prev) = prev_depth {
                if prev >= bbox.depth {
                    out.push_str(&")".repeat(prev - bbox.depth + 1));
                }
            }
            prev_depth = Some(bbox.depth);
            if bbox.kind == BoxKind::Page {
                height = bbox.bbox[3];
            }
            let [x1, y1, x2, y2] = bbox.bbox;
            if bbox.depth != 0 {
                out.push('\n');
            }
            out.push_str(&" ".repeat(bbox.depth * 2));
            let _ = write!(
                out,
                "({} {} {} {} {}",
                bbox.kind.djvu_kind(),
                x1,
                height - y2,
                x2,
                height - y1
            );
            if let Some(text) = &bbox.text {
                let _ = write!(out, " \"{}\"", escape_djvu(text));
            }
        }
        if let Some(prev) = prev_depth {
            out.push_str(&")".repeat(prev + 1));
            out.push('\n');
        }
        out
    }

    /// DjVu map areas, one per box carrying text.
    pub fn to_djvu_ann(&self) -> String {
        let mut out = String::new();
        let mut height = self.boxes.first().map(|b| b.bbox[3]).unwrap_or_default();
        for bbox in &self.boxes {
            if bbox.kind == BoxKind::Page {
                height = bbox.bbox[3];
            }
            if let Some(text) = &bbox.text {
                let [x1, y1, x2, y2] = bbox.bbox;
                let _ = writeln!(
                    out,
                    "(maparea \"\" \"{}\" (rect {} {} {} {}) (hilite #{}) (xor))",
                    escape_djvu(text),
                    x1,
                    height - y2,
                    x2 - x1,
                    y2 - y1,
                    ANNOTATION_COLOR
                );
            }
        }
        out
    }

    /// Restrict the tree to a rectangle, translating boxes to its origin.
    ///
    /// Boxes entirely outside the rectangle are removed; straddling boxes
    /// are clipped.
    pub fn crop(&self, left: i64, top: i64, width: i64, height: i64) -> Self {
        let boxes = self
            .boxes
            .iter()
            .filter_map(|bbox| {
                let (x1, x2) = crop_axis(bbox.bbox[0], bbox.bbox[2], left, left + width)?;
                let (y1, y2) = crop_axis(bbox.bbox[1], bbox.bbox[3], top, top + height)?;
                let mut cropped = bbox.clone();
                cropped.bbox = [x1, y1, x2, y2];
                Some(cropped)
            })
            .collect();
        Self { boxes }
    }

    /// Rotate the tree by a multiple of 90 degrees clockwise on a page of
    /// `width` x `height` pixels (the size before rotation).
    pub fn rotate(&self, angle: i32, width: i64, height: i64) -> Self {
        let quarter_turns = angle.rem_euclid(360) / 90;
        let boxes = self
            .boxes
            .iter()
            .map(|bbox| {
                let [x1, y1, x2, y2] = bbox.bbox;
                let mut rotated = bbox.clone();
                rotated.bbox = match quarter_turns {
                    1 => [height - y2, x1, height - y1, x2],
                    2 => [width - x2, height - y2, width - x1, height - y1],
                    3 => [y1, width - x2, y2, width - x1],
                    _ => bbox.bbox,
                };
                rotated
            })
            .collect();
        Self { boxes }
    }
}

/// Header shared by every hOCR document written here, up to and including
/// the opening `<body>`.
pub fn hocr_header() -> String {
    format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n\
<!DOCTYPE html PUBLIC \"-//W3C//DTD XHTML 1.0 Transitional//EN\"\n \
\"http://www.w3.org/TR/xhtml1/DTD/xhtml1-transitional.dtd\">\n\
<html xmlns=\"http://www.w3.org/1999/xhtml\" xml:lang=\"en\" lang=\"en\">\n \
<head>\n  \
<meta http-equiv=\"Content-Type\" content=\"text/html;charset=utf-8\" />\n  \
<meta name='ocr-system' content='scanwerk {}' />\n  \
<meta name='ocr-capabilities' content='{}'/>\n \
</head>\n \
<body>",
        env!("CARGO_PKG_VERSION"),
        HOCR_CAPABILITIES
    )
}

/// Contents of the `<body>` element of an hOCR document, if any.
pub fn hocr_body(hocr: &str) -> Option<&str> {
    BODY_RE.captures(hocr).and_then(|c| c.get(1)).map(|m| m.as_str())
}

fn indent(depth: usize) -> String {
    " ".repeat(2 + depth)
}

fn crop_axis(t1: i64, t2: i64, c1: i64, c2: i64) -> Option<(i64, i64)> {
    if t1 > c2 || t2 < c1 {
        return None;
    }
    Some((t1.max(c1) - c1, t2.min(c2) - c1))
}

fn escape_djvu(text: &str) -> String {
    text.replace('\\', "\\\\").replace('"', "\\\"")
}

fn escape_xml(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

fn unescape_xml(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

// -- hOCR parsing -------------------------------------------------------------

#[derive(Debug)]
struct Node {
    bbox: Bbox,
    children: Vec<usize>,
}

/// Tag-level hOCR reader. Elements without an hOCR class inherit the box of
/// their parent, so `<strong>` and friends style the enclosing word.
#[derive(Debug, Default)]
struct HocrParser {
    nodes: Vec<Node>,
    roots: Vec<usize>,
    stack: Vec<Option<usize>>,
}

impl HocrParser {
    fn feed(&mut self, body: &str) {
        for caps in TOKEN_RE.captures_iter(body) {
            if let Some(text) = caps.get(5) {
                self.handle_text(text.as_str());
                continue;
            }
            let Some(name) = caps.get(2) else {
                continue; // comment
            };
            let closing = caps.get(1).is_some_and(|m| !m.as_str().is_empty());
            let self_closing = caps.get(4).is_some_and(|m| !m.as_str().is_empty());
            if closing {
                self.stack.pop();
            } else {
                let attrs = caps.get(3).map(|m| m.as_str()).unwrap_or_default();
                self.handle_start(name.as_str(), attrs, self_closing);
            }
        }
    }

    fn handle_start(&mut self, tag: &str, attrs: &str, self_closing: bool) {
        let parent = self.stack.last().copied().flatten();
        let mut class = None;
        let mut title = None;
        let mut id = None;
        for attr in ATTR_RE.captures_iter(attrs) {
            let value = attr
                .get(2)
                .or_else(|| attr.get(3))
                .map(|m| m.as_str().to_string())
                .unwrap_or_default();
            match &attr[1] {
                "class" => class = Some(value),
                "title" => title = Some(value),
                "id" => id = Some(value),
                _ => {}
            }
        }

        let current = match (class.as_deref().and_then(BoxKind::from_hocr_class), title) {
            (Some(kind), Some(title)) => self.open_box(kind, &title, id, parent),
            _ => parent,
        };

        if matches!(tag, "strong" | "em") {
            if let Some(index) = current {
                self.nodes[index].bbox.style.push(tag.to_string());
            }
        }
        if !self_closing {
            self.stack.push(current);
        }
    }

    fn open_box(
        &mut self,
        kind: BoxKind,
        title: &str,
        id: Option<String>,
        parent: Option<usize>,
    ) -> Option<usize> {
        let parsed = parse_title(kind, title);

        // An ocrx_word nested in an ocr_word only refines its parent.
        if let Some(p) = parent {
            let parent_box = &mut self.nodes[p].bbox;
            if kind == BoxKind::Word && parent_box.kind == BoxKind::Word {
                parent_box.confidence = parent_box.confidence.or(parsed.confidence);
                parent_box.baseline = parent_box.baseline.take().or(parsed.baseline);
                parent_box.textangle = parent_box.textangle.or(parsed.textangle);
                return Some(p);
            }
        }

        if !parsed.has_bbox {
            return parent;
        }
        let mut bbox = parsed.bbox;
        bbox.id = id;
        let index = self.nodes.len();
        self.nodes.push(Node {
            bbox,
            children: Vec::new(),
        });
        match (kind, parent) {
            (BoxKind::Page, _) | (_, None) => self.roots.push(index),
            (_, Some(p)) => self.nodes[p].children.push(index),
        }
        Some(index)
    }

    fn handle_text(&mut self, raw: &str) {
        let text = raw.trim();
        if text.is_empty() {
            return;
        }
        if let Some(Some(index)) = self.stack.last() {
            self.nodes[*index].bbox.text = Some(unescape_xml(text));
        }
    }

    /// Drop empty branches below `index`; returns whether `index` survives.
    fn prune(&mut self, index: usize) -> bool {
        let children = std::mem::take(&mut self.nodes[index].children);
        let kept: Vec<usize> = children.into_iter().filter(|&c| self.prune(c)).collect();
        let keep = !kept.is_empty() || self.nodes[index].bbox.text.is_some();
        self.nodes[index].children = kept;
        keep
    }

    fn flatten(&self, index: usize, depth: usize, out: &mut Vec<Bbox>) {
        let node = &self.nodes[index];
        let mut bbox = node.bbox.clone();
        bbox.depth = depth;
        out.push(bbox);
        for &child in &node.children {
            self.flatten(child, depth + 1, out);
        }
    }
}

struct ParsedTitle {
    bbox: Bbox,
    has_bbox: bool,
    confidence: Option<i64>,
    baseline: Option<Vec<f64>>,
    textangle: Option<i64>,
}

fn parse_title(kind: BoxKind, title: &str) -> ParsedTitle {
    let mut bbox = Bbox::new(kind, [0; 4], 0);
    let mut has_bbox = false;
    if let Some(c) = BBOX_RE.captures(title) {
        let coords: Vec<i64> = (1..=4).filter_map(|i| c[i].parse().ok()).collect();
        // Degenerate boxes (zero width or height) are ignored.
        if coords.len() == 4 && coords[0] != coords[2] && coords[1] != coords[3] {
            bbox.bbox = [coords[0], coords[1], coords[2], coords[3]];
            has_bbox = true;
        }
    }
    let textangle = TEXTANGLE_RE
        .captures(title)
        .and_then(|c| c[1].parse().ok());
    let confidence = WCONF_RE.captures(title).and_then(|c| c[1].parse().ok());
    let baseline = BASELINE_RE.captures(title).map(|c| {
        let mut values: Vec<f64> = c[1]
            .split_whitespace()
            .filter_map(|v| v.parse().ok())
            .collect();
        if values.len() < 2 {
            values.insert(0, 0.0);
        }
        values
    });
    bbox.textangle = textangle;
    bbox.confidence = confidence;
    bbox.baseline = baseline.clone();
    ParsedTitle {
        bbox,
        has_bbox,
        confidence,
        baseline,
        textangle,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<html>
 <body>
  <div class='ocr_page' id='page_1' title='image "x.png"; bbox 0 0 422 61; ppageno 0'>
   <div class='ocr_carea' id='block_1_1' title="bbox 1 14 420 59">
    <p class='ocr_par' id='par_1_1' title="bbox 1 14 420 59">
     <span class='ocr_line' id='line_1_1' title="bbox 1 14 420 59; baseline 0 -11">
      <span class='ocrx_word' id='word_1_1' title='bbox 1 14 77 48; x_wconf 90'><strong>The</strong></span>
      <span class='ocrx_word' id='word_1_2' title='bbox 92 14 202 59; x_wconf 74'>quick</span>
      <span class='ocrx_word' id='word_1_3' title='bbox 214 14 341 48; x_wconf 75'>brown</span>
      <span class='ocrx_word' id='word_1_4' title='bbox 250 20 260 30'> </span>
     </span>
    </p>
   </div>
  </div>
 </body>
</html>
"#;

    #[test]
    fn parses_hocr_into_depth_ordered_boxes() {
        let tree = BboxTree::from_hocr(SAMPLE).unwrap();
        let kinds: Vec<_> = tree.iter().map(|b| (b.kind, b.depth)).collect();
        assert_eq!(
            kinds,
            vec![
                (BoxKind::Page, 0),
                (BoxKind::Column, 1),
                (BoxKind::Para, 2),
                (BoxKind::Line, 3),
                (BoxKind::Word, 4),
                (BoxKind::Word, 4),
                (BoxKind::Word, 4),
            ]
        );
        let first_word = &tree.boxes()[4];
        assert_eq!(first_word.text.as_deref(), Some("The"));
        assert_eq!(first_word.confidence, Some(90));
        assert_eq!(first_word.style, vec!["strong".to_string()]);
        assert_eq!(tree.boxes()[3].baseline, Some(vec![0.0, -11.0]));
    }

    #[test]
    fn missing_body_is_an_error() {
        assert!(BboxTree::from_hocr("<html></html>").is_err());
    }

    #[test]
    fn text_separates_paragraphs() {
        let tree = BboxTree::from_hocr(SAMPLE).unwrap();
        assert_eq!(tree.to_text(), "The quick brown");

        let mut two_paras = tree.boxes().to_vec();
        let mut second = two_paras[2].clone();
        second.text = Some("Fox".into());
        two_paras.push(second);
        let tree = BboxTree { boxes: two_paras };
        assert_eq!(tree.to_text(), "The quick brown\n\nFox");
    }

    #[test]
    fn hocr_export_reparses_to_the_same_text() {
        let tree = BboxTree::from_hocr(SAMPLE).unwrap();
        let hocr = tree.to_hocr();
        assert!(hocr.starts_with("<?xml"));
        assert!(hocr.contains("<span class='ocr_word' id='word_1_2' title='bbox 92 14 202 59; x_wconf 74'>quick</span>"));
        assert!(hocr.ends_with(" </body>\n</html>\n"));
        let reparsed = BboxTree::from_hocr(&hocr).unwrap();
        assert_eq!(reparsed.to_text(), tree.to_text());
        assert_eq!(reparsed.boxes().len(), tree.boxes().len());
    }

    #[test]
    fn djvu_text_flips_y_axis_and_balances_parens() {
        let tree = BboxTree::from_hocr(SAMPLE).unwrap();
        let txt = tree.to_djvu_txt();
        assert!(txt.starts_with("(page 0 0 422 61"));
        assert!(txt.contains("(word 1 13 77 47 \"The\")"));
        let open = txt.matches('(').count();
        let close = txt.matches(')').count();
        assert_eq!(open, close);
        assert!(txt.ends_with("))))\n"));
    }

    #[test]
    fn djvu_annotation_uses_width_and_height() {
        let tree = BboxTree::from_text("note", 100, 50);
        assert_eq!(
            tree.to_djvu_ann(),
            "(maparea \"\" \"note\" (rect 0 0 100 50) (hilite #cccf00) (xor))\n"
        );
    }

    #[test]
    fn crop_clips_and_discards() {
        let tree = BboxTree::from_hocr(SAMPLE).unwrap();
        let left = tree.crop(0, 0, 100, 61);
        let words: Vec<_> = left.iter().filter_map(|b| b.text.clone()).collect();
        assert_eq!(words, vec!["The".to_string(), "quick".to_string()]);
        let quick = left.iter().find(|b| b.text.as_deref() == Some("quick")).unwrap();
        assert_eq!(quick.bbox, [92, 14, 100, 59]);

        let right = tree.crop(211, 0, 211, 61);
        let brown = right.iter().find(|b| b.text.as_deref() == Some("brown")).unwrap();
        assert_eq!(brown.bbox, [3, 14, 130, 48]);
        assert!(right.iter().all(|b| b.text.as_deref() != Some("The")));
    }

    #[test]
    fn quarter_turn_maps_boxes_into_rotated_frame() {
        let tree = BboxTree::from_text("x", 200, 100);
        let rotated = tree.rotate(90, 200, 100);
        assert_eq!(rotated.boxes()[0].bbox, [0, 0, 100, 200]);
    }

    #[test]
    fn json_round_trip_keeps_wire_names() {
        let tree = BboxTree::from_text("hello", 10, 20);
        let json = tree.to_json().unwrap();
        assert!(json.contains("\"type\":\"page\""));
        assert_eq!(BboxTree::from_json(&json).unwrap(), tree);
    }
}
