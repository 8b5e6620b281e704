//! Positioned text runs from a page's content stream.
//!
//! Walks the text and graphics state operators so that every string a page
//! draws comes out with its page-space origin and an estimated width. Glyph
//! widths come from the font's `Widths` array when it has one; the standard
//! fonts fall back to a flat per-glyph estimate.

use std::collections::BTreeMap;

use lopdf::content::Content;
use lopdf::{Dictionary, Document, Encoding, Object, ObjectId};

use crate::error::Result;

/// One string drawn by a text-showing operator, in page space.
#[derive(Debug, Clone, PartialEq)]
pub struct TextRun {
    pub text: String,
    /// Left edge.
    pub x: f32,
    /// Baseline.
    pub y: f32,
    pub width: f32,
    pub font_size: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Matrix([f32; 6]);

impl Matrix {
    const IDENTITY: Matrix = Matrix([1.0, 0.0, 0.0, 1.0, 0.0, 0.0]);

    fn translate(tx: f32, ty: f32) -> Self {
        Matrix([1.0, 0.0, 0.0, 1.0, tx, ty])
    }

    fn from_operands(operands: &[Object]) -> Option<Self> {
        if operands.len() != 6 {
            return None;
        }
        let mut m = [0.0; 6];
        for (slot, operand) in m.iter_mut().zip(operands) {
            *slot = operand.as_float().ok()?;
        }
        Some(Matrix(m))
    }

    /// `self` applied first, then `other`.
    fn then(&self, other: &Matrix) -> Matrix {
        let [a1, b1, c1, d1, e1, f1] = self.0;
        let [a2, b2, c2, d2, e2, f2] = other.0;
        Matrix([
            a1 * a2 + b1 * c2,
            a1 * b2 + b1 * d2,
            c1 * a2 + d1 * c2,
            c1 * b2 + d1 * d2,
            e1 * a2 + f1 * c2 + e2,
            e1 * b2 + f1 * d2 + f2,
        ])
    }
}

struct PageFont<'a> {
    encoding: Option<Encoding<'a>>,
    first_char: i64,
    /// Glyph advances in text space units (thousandths already divided out).
    widths: Vec<f32>,
    missing_width: f32,
    two_byte: bool,
}

impl<'a> PageFont<'a> {
    fn load(doc: &'a Document, font: &'a Dictionary) -> Self {
        let base_font = font
            .get(b"BaseFont")
            .and_then(Object::as_name)
            .map(|n| String::from_utf8_lossy(n).to_string())
            .unwrap_or_default();
        let widths = font
            .get_deref(b"Widths", doc)
            .and_then(Object::as_array)
            .map(|ws| {
                ws.iter()
                    .map(|w| w.as_float().unwrap_or(0.0) / 1000.0)
                    .collect()
            })
            .unwrap_or_default();
        Self {
            encoding: font.get_font_encoding(doc).ok(),
            first_char: font.get(b"FirstChar").and_then(Object::as_i64).unwrap_or(0),
            widths,
            missing_width: if base_font.contains("Courier") { 0.6 } else { 0.5 },
            two_byte: font.get(b"Subtype").and_then(Object::as_name).ok() == Some(b"Type0".as_slice()),
        }
    }

    fn decode(&self, bytes: &[u8]) -> String {
        self.encoding
            .as_ref()
            .and_then(|enc| Document::decode_text(enc, bytes).ok())
            .unwrap_or_else(|| bytes.iter().map(|&b| b as char).collect())
    }

    fn glyph_width(&self, code: u8) -> f32 {
        usize::try_from(i64::from(code) - self.first_char)
            .ok()
            .and_then(|idx| self.widths.get(idx))
            .copied()
            .filter(|w| *w > 0.0)
            .unwrap_or(self.missing_width)
    }
}

#[derive(Debug, Clone, Copy)]
struct TextState {
    tm: Matrix,
    line: Matrix,
    size: f32,
    leading: f32,
    char_spacing: f32,
    word_spacing: f32,
    h_scale: f32,
}

impl Default for TextState {
    fn default() -> Self {
        Self {
            tm: Matrix::IDENTITY,
            line: Matrix::IDENTITY,
            size: 0.0,
            leading: 0.0,
            char_spacing: 0.0,
            word_spacing: 0.0,
            h_scale: 1.0,
        }
    }
}

impl TextState {
    fn next_line(&mut self, tx: f32, ty: f32) {
        self.line = Matrix::translate(tx, ty).then(&self.line);
        self.tm = self.line;
    }

    /// Horizontal advance of `bytes` in unscaled text space.
    fn advance(&self, font: Option<&PageFont<'_>>, bytes: &[u8]) -> f32 {
        let glyphs: f32 = match font {
            Some(f) if f.two_byte => (bytes.len() / 2) as f32 * f.missing_width * self.size,
            Some(f) => bytes.iter().map(|&b| f.glyph_width(b) * self.size).sum(),
            None => bytes.len() as f32 * 0.5 * self.size,
        };
        let spacing: f32 = bytes
            .iter()
            .map(|&b| self.char_spacing + if b == b' ' { self.word_spacing } else { 0.0 })
            .sum();
        (glyphs + spacing) * self.h_scale
    }
}

struct Walker<'a> {
    fonts: BTreeMap<Vec<u8>, PageFont<'a>>,
    font: Option<Vec<u8>>,
    ctm: Matrix,
    saved: Vec<Matrix>,
    text: TextState,
    runs: Vec<TextRun>,
}

impl<'a> Walker<'a> {
    fn current_font(&self) -> Option<&PageFont<'a>> {
        self.font.as_ref().and_then(|name| self.fonts.get(name))
    }

    fn emit(&mut self, text: String, advance: f32) {
        let placed = self.text.tm.then(&self.ctm);
        let [a, _, _, d, x, y] = placed.0;
        if !text.trim().is_empty() {
            self.runs.push(TextRun {
                text,
                x,
                y,
                width: advance * a.abs(),
                font_size: self.text.size * d.abs(),
            });
        }
        self.text.tm = Matrix::translate(advance, 0.0).then(&self.text.tm);
    }

    fn show(&mut self, bytes: &[u8]) {
        let font = self.current_font();
        let text = font
            .map(|f| f.decode(bytes))
            .unwrap_or_else(|| bytes.iter().map(|&b| b as char).collect());
        let advance = self.text.advance(font, bytes);
        self.emit(text, advance);
    }

    fn show_adjusted(&mut self, items: &[Object]) {
        let mut text = String::new();
        let mut advance = 0.0;
        for item in items {
            match item {
                Object::String(bytes, _) => {
                    let font = self.current_font();
                    text.push_str(
                        &font
                            .map(|f| f.decode(bytes))
                            .unwrap_or_else(|| bytes.iter().map(|&b| b as char).collect()),
                    );
                    advance += self.text.advance(font, bytes);
                }
                other => {
                    let Ok(adjust) = other.as_float() else { continue };
                    advance -= adjust / 1000.0 * self.text.size * self.text.h_scale;
                    // A gap wider than a typical space separates words.
                    if adjust < -200.0 && !text.is_empty() && !text.ends_with(' ') {
                        text.push(' ');
                    }
                }
            }
        }
        self.emit(text, advance);
    }

    fn apply(&mut self, operator: &str, operands: &[Object]) {
        let num = |i: usize| operands.get(i).and_then(|o| o.as_float().ok());
        match operator {
            "q" => self.saved.push(self.ctm),
            "Q" => self.ctm = self.saved.pop().unwrap_or(Matrix::IDENTITY),
            "cm" => {
                if let Some(m) = Matrix::from_operands(operands) {
                    self.ctm = m.then(&self.ctm);
                }
            }
            "BT" => {
                self.text.tm = Matrix::IDENTITY;
                self.text.line = Matrix::IDENTITY;
            }
            "Tf" => {
                self.font = operands
                    .first()
                    .and_then(|o| o.as_name().ok())
                    .map(<[u8]>::to_vec);
                self.text.size = num(1).unwrap_or(self.text.size);
            }
            "Tc" => self.text.char_spacing = num(0).unwrap_or(0.0),
            "Tw" => self.text.word_spacing = num(0).unwrap_or(0.0),
            "Tz" => self.text.h_scale = num(0).unwrap_or(100.0) / 100.0,
            "TL" => self.text.leading = num(0).unwrap_or(0.0),
            "Td" | "TD" => {
                let (tx, ty) = (num(0).unwrap_or(0.0), num(1).unwrap_or(0.0));
                if operator == "TD" {
                    self.text.leading = -ty;
                }
                self.text.next_line(tx, ty);
            }
            "Tm" => {
                if let Some(m) = Matrix::from_operands(operands) {
                    self.text.tm = m;
                    self.text.line = m;
                }
            }
            "T*" => self.text.next_line(0.0, -self.text.leading),
            "Tj" => {
                if let Some(Object::String(bytes, _)) = operands.first() {
                    self.show(bytes);
                }
            }
            "'" => {
                self.text.next_line(0.0, -self.text.leading);
                if let Some(Object::String(bytes, _)) = operands.first() {
                    self.show(bytes);
                }
            }
            "\"" => {
                self.text.word_spacing = num(0).unwrap_or(self.text.word_spacing);
                self.text.char_spacing = num(1).unwrap_or(self.text.char_spacing);
                self.text.next_line(0.0, -self.text.leading);
                if let Some(Object::String(bytes, _)) = operands.get(2) {
                    self.show(bytes);
                }
            }
            "TJ" => {
                if let Some(Object::Array(items)) = operands.first() {
                    self.show_adjusted(items);
                }
            }
            _ => {}
        }
    }
}

/// Every non-blank string the page draws, in content-stream order.
pub fn page_runs(doc: &Document, page_id: ObjectId) -> Result<Vec<TextRun>> {
    let fonts = doc
        .get_page_fonts(page_id)?
        .into_iter()
        .map(|(name, dict)| (name, PageFont::load(doc, dict)))
        .collect();
    let content = Content::decode(&doc.get_page_content(page_id)?)?;

    let mut walker = Walker {
        fonts,
        font: None,
        ctm: Matrix::IDENTITY,
        saved: Vec::new(),
        text: TextState::default(),
        runs: Vec::new(),
    };
    for op in &content.operations {
        walker.apply(&op.operator, &op.operands);
    }
    Ok(walker.runs)
}
