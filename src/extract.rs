//! Table extraction from plaintext statement PDFs.
//!
//! Each page's content stream is walked into positioned text runs (see
//! [`crate::layout`]). Runs sharing a baseline form a line, and each line is
//! split into cells wherever the horizontal gap is wider than a word space. A
//! line with at least two cells is tabular; a run of tabular lines is one grid.
//! The first line of a run fixes the column spans and later lines are assigned
//! to columns by horizontal overlap, so an empty withdrawal cell does not shift
//! the deposit into the wrong column.

use std::collections::VecDeque;
use std::sync::OnceLock;

use lopdf::{Document, ObjectId};
use regex::Regex;
use tracing::debug;

use crate::error::Result;
use crate::layout::{page_runs, TextRun};
use crate::models::RawGrid;

/// Runs whose baselines differ by less than this share of the font size are on one line.
const ROW_TOLERANCE: f32 = 0.4;
/// Separately drawn words closer than this (in ems) belong to the same cell.
const WORD_GAP: f32 = 0.75;
/// Below this gap (in ems) two runs are pieces of one word.
const GLYPH_GAP: f32 = 0.15;

/// Produces the grids of a plaintext document, in page order then table order.
pub trait ExtractTables {
    fn grids(&self, plaintext: &[u8]) -> Result<Box<dyn Iterator<Item = RawGrid>>>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct PdfTableExtractor;

impl ExtractTables for PdfTableExtractor {
    fn grids(&self, plaintext: &[u8]) -> Result<Box<dyn Iterator<Item = RawGrid>>> {
        let document = Document::load_mem(plaintext)?;
        // get_pages is keyed by page number, so this is already page order.
        let pages: Vec<(u32, ObjectId)> = document.get_pages().into_iter().collect();
        Ok(Box::new(PageGrids {
            document,
            pages: pages.into_iter(),
            pending: VecDeque::new(),
        }))
    }
}

/// Single pass over a document; pages are read only as grids are pulled.
struct PageGrids {
    document: Document,
    pages: std::vec::IntoIter<(u32, ObjectId)>,
    pending: VecDeque<RawGrid>,
}

impl PageGrids {
    fn scan(&self, page: u32, page_id: ObjectId) -> Vec<RawGrid> {
        match page_runs(&self.document, page_id) {
            Ok(runs) => grids_from_lines(lines_from_runs(runs)),
            Err(e) => {
                debug!(page, error = %e, "content stream unreadable, trying plain text");
                match self.document.extract_text(&[page]) {
                    Ok(text) => grids_from_text(&text),
                    Err(e) => {
                        debug!(page, error = %e, "page has no extractable text");
                        Vec::new()
                    }
                }
            }
        }
    }
}

impl Iterator for PageGrids {
    type Item = RawGrid;

    fn next(&mut self) -> Option<RawGrid> {
        loop {
            if let Some(grid) = self.pending.pop_front() {
                return Some(grid);
            }
            let (page, page_id) = self.pages.next()?;
            let grids = PageGrids::scan(self, page, page_id);
            debug!(page, grids = grids.len(), "scanned page");
            self.pending.extend(grids);
        }
    }
}

// ---------------------------------------------------------------------------
// Text layout -> grids
// ---------------------------------------------------------------------------

/// A run of words separated by single spaces, with its horizontal span on the line.
#[derive(Debug, Clone, PartialEq)]
struct Segment {
    start: f32,
    end: f32,
    text: String,
}

impl Segment {
    fn overlap(&self, other: &Segment) -> f32 {
        (self.end.min(other.end) - self.start.max(other.start)).max(0.0)
    }

    fn center_distance(&self, other: &Segment) -> f32 {
        ((self.start + self.end) - (other.start + other.end)).abs()
    }
}

fn segment_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"[^\s]+(?: [^\s]+)*").expect("segment pattern is valid"))
}

/// Segments of a plain text line, measured in characters.
fn segments(line: &str) -> Vec<Segment> {
    segment_pattern()
        .find_iter(line)
        .map(|m| {
            let start = line[..m.start()].chars().count();
            let text = m.as_str().to_string();
            let end = start + text.chars().count();
            Segment {
                start: start as f32,
                end: end as f32,
                text,
            }
        })
        .collect()
}

/// Group runs into lines, top of the page first.
fn lines_from_runs(mut runs: Vec<TextRun>) -> Vec<Vec<Segment>> {
    runs.sort_by(|a, b| b.y.total_cmp(&a.y).then(a.x.total_cmp(&b.x)));
    let mut rows: Vec<Vec<TextRun>> = Vec::new();
    for run in runs {
        let tolerance = (run.font_size * ROW_TOLERANCE).max(1.0);
        match rows.last_mut() {
            Some(row) if (row[0].y - run.y).abs() <= tolerance => row.push(run),
            _ => rows.push(vec![run]),
        }
    }
    rows.into_iter()
        .map(|mut row| {
            row.sort_by(|a, b| a.x.total_cmp(&b.x));
            row_segments(&row)
        })
        .collect()
}

/// Cells of one line. Segment spans inside a run are interpolated from the
/// run's width; a run starting within a word gap of the previous cell extends it.
fn row_segments(row: &[TextRun]) -> Vec<Segment> {
    let mut cells: Vec<Segment> = Vec::new();
    for run in row {
        let per_char = run.width / run.text.chars().count().max(1) as f32;
        for (idx, m) in segment_pattern().find_iter(&run.text).enumerate() {
            let offset = run.text[..m.start()].chars().count() as f32;
            let len = m.as_str().chars().count() as f32;
            let seg = Segment {
                start: run.x + offset * per_char,
                end: run.x + (offset + len) * per_char,
                text: m.as_str().to_string(),
            };
            match cells.last_mut() {
                Some(prev) if idx == 0 && seg.start - prev.end <= run.font_size * WORD_GAP => {
                    if seg.start - prev.end > run.font_size * GLYPH_GAP {
                        prev.text.push(' ');
                    }
                    prev.text.push_str(&seg.text);
                    prev.end = prev.end.max(seg.end);
                }
                _ => cells.push(seg),
            }
        }
    }
    cells
}

fn best_column(columns: &[Segment], cell: &Segment) -> usize {
    let mut best = 0;
    let mut best_overlap = 0.0;
    for (idx, col) in columns.iter().enumerate() {
        let overlap = col.overlap(cell);
        if overlap > best_overlap {
            best = idx;
            best_overlap = overlap;
        }
    }
    if best_overlap > 0.0 {
        return best;
    }
    columns
        .iter()
        .enumerate()
        .min_by(|(_, a), (_, b)| a.center_distance(cell).total_cmp(&b.center_distance(cell)))
        .map(|(idx, _)| idx)
        .unwrap_or(0)
}

fn align(columns: &[Segment], cells: &[Segment]) -> Vec<String> {
    let mut row = vec![String::new(); columns.len()];
    for cell in cells {
        let slot = &mut row[best_column(columns, cell)];
        if !slot.is_empty() {
            slot.push(' ');
        }
        slot.push_str(&cell.text);
    }
    row
}

/// Split a page's lines into grids. Empty lines do not end a grid; a line
/// with a single cell does.
fn grids_from_lines(lines: impl IntoIterator<Item = Vec<Segment>>) -> Vec<RawGrid> {
    let mut grids = Vec::new();
    let mut columns: Vec<Segment> = Vec::new();
    let mut current: RawGrid = Vec::new();

    for cells in lines {
        if cells.is_empty() {
            continue;
        }
        if cells.len() < 2 {
            if !current.is_empty() {
                grids.push(std::mem::take(&mut current));
            }
            continue;
        }
        if current.is_empty() {
            current.push(cells.iter().map(|c| c.text.clone()).collect());
            columns = cells;
        } else {
            current.push(align(&columns, &cells));
        }
    }
    if !current.is_empty() {
        grids.push(current);
    }
    grids
}

/// Grids from a page's plain extracted text, where columns are runs of spaces.
pub fn grids_from_text(text: &str) -> Vec<RawGrid> {
    grids_from_lines(text.lines().map(|line| segments(&line.replace('\t', "    "))))
}

#[cfg(test)]
pub(crate) fn pdf_from_pages(base_font: &str, pages: Vec<Vec<lopdf::content::Operation>>) -> Vec<u8> {
    use lopdf::content::Content;
    use lopdf::{dictionary, Object, Stream};

    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => base_font,
        "Encoding" => "WinAnsiEncoding",
    });
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! { "F1" => font_id },
    });

    let mut kids: Vec<Object> = Vec::new();
    for operations in pages {
        let content = Content { operations };
        let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode().unwrap()));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
            "Resources" => resources_id,
            "MediaBox" => vec![0.into(), 0.into(), 595.into(), 842.into()],
        });
        kids.push(page_id.into());
    }
    let count = kids.len() as i64;
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => count,
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut buf = Vec::new();
    doc.save_to(&mut buf).unwrap();
    buf
}

/// Monospaced pages, one `Tj` per line with columns padded by spaces.
#[cfg(test)]
pub(crate) fn sample_pdf(pages: &[&[&str]]) -> Vec<u8> {
    use lopdf::content::Operation;
    use lopdf::Object;

    let pages = pages
        .iter()
        .map(|lines| {
            let mut operations = Vec::new();
            for (i, line) in lines.iter().enumerate() {
                operations.push(Operation::new("BT", vec![]));
                operations.push(Operation::new("Tf", vec!["F1".into(), 9.into()]));
                operations.push(Operation::new("Td", vec![36.into(), (800 - 12 * i as i64).into()]));
                operations.push(Operation::new("Tj", vec![Object::string_literal(*line)]));
                operations.push(Operation::new("ET", vec![]));
            }
            operations
        })
        .collect();
    pdf_from_pages("Courier", pages)
}

/// One page where every cell is placed with its own `Td` and `Tj`, the way
/// statement generators with proportional fonts lay out tables.
#[cfg(test)]
pub(crate) fn positioned_page(rows: &[&[(f32, &str)]]) -> Vec<lopdf::content::Operation> {
    use lopdf::content::Operation;
    use lopdf::Object;

    let mut operations = Vec::new();
    for (i, cells) in rows.iter().enumerate() {
        operations.push(Operation::new("BT", vec![]));
        operations.push(Operation::new("Tf", vec!["F1".into(), 9.into()]));
        let mut line_x = 0.0;
        for (j, (x, text)) in cells.iter().enumerate() {
            let ty = if j == 0 { 700.0 - 12.0 * i as f32 } else { 0.0 };
            operations.push(Operation::new("Td", vec![(x - line_x).into(), ty.into()]));
            operations.push(Operation::new("Tj", vec![Object::string_literal(*text)]));
            line_x = *x;
        }
        operations.push(Operation::new("ET", vec![]));
    }
    operations
}
