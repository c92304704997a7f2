//! Document assembly and rendering.
//!
//! `JsonBuilder` accumulates named fields, nested documents, and arrays into
//! one JSON object, in insertion order, and renders it to text. Layout is a
//! construction-time choice: single-line, or pretty-printed with one tab per
//! nesting level. Date values render as bare `ISODate("...")` constructor
//! calls, a deliberate extension for document-store import tooling.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;
use thiserror::Error;

/// Code points that must be escaped inside string values: the double quote
/// plus the control, format, private-use, and unassigned classes. Surrogates
/// cannot occur in a Rust string, so they need no entry.
static NEEDS_ESCAPE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"["\p{Cc}\p{Cf}\p{Co}\p{Cn}]"#).unwrap());

/// A field was set twice on the same document.
#[derive(Debug, Error)]
#[error("duplicate field name `{0}` in document")]
pub struct DuplicateField(pub String);

/// One converted column value, ready to be placed in a document.
#[derive(Debug, Clone, PartialEq)]
pub enum ScalarToken {
    /// Rendered as a bare integer literal.
    Int(i64),
    /// A numeric value carried in its exact textual form, rendered unquoted.
    Decimal(String),
    /// Rendered as a quoted, escaped JSON string.
    Text(String),
    /// An ISO date-time string, rendered as `ISODate("...")`.
    Date(String),
}

impl ScalarToken {
    /// The plain string form of the value, as callers that reuse it (for
    /// example as a recursion key) expect to see it.
    pub fn canonical(&self) -> String {
        match self {
            ScalarToken::Int(v) => v.to_string(),
            ScalarToken::Decimal(s) | ScalarToken::Text(s) | ScalarToken::Date(s) => s.clone(),
        }
    }
}

/// Append-only builder over one JSON document.
///
/// Fields appear in the rendered text in the order they were set; setting
/// the same name twice is an error. Arrays open lazily from the caller's
/// side: a label with zero elements is simply never opened, so the field is
/// absent rather than an empty array.
///
/// ```
/// use foundry::json::{JsonBuilder, ScalarToken};
///
/// let mut doc = JsonBuilder::single_line();
/// doc.set_scalar("id", &ScalarToken::Int(7)).unwrap();
/// doc.set_scalar("name", &ScalarToken::Text("Ada".into())).unwrap();
/// assert_eq!(doc.render(), r#"{ "id": 7, "name": "Ada"}"#);
/// ```
#[derive(Debug)]
pub struct JsonBuilder {
    buf: String,
    out_pad: String,
    in_pad: String,
    one_line: bool,
    suppress_comma: bool,
    names: HashSet<String>,
}

impl JsonBuilder {
    /// A builder that renders on a single line, with no indentation.
    pub fn single_line() -> Self {
        JsonBuilder {
            buf: String::new(),
            out_pad: String::new(),
            in_pad: String::from(" "),
            one_line: true,
            suppress_comma: false,
            names: HashSet::new(),
        }
    }

    /// A builder for a document nested `level` levels deep, rendered with
    /// tab indentation. Fields sit one tab deeper than the braces.
    pub fn pretty(level: usize) -> Self {
        let out_pad = "\t".repeat(level);
        let in_pad = format!("{}\t", out_pad);
        JsonBuilder {
            buf: String::new(),
            out_pad,
            in_pad,
            one_line: false,
            suppress_comma: false,
            names: HashSet::new(),
        }
    }

    /// Set a scalar field.
    pub fn set_scalar(&mut self, name: &str, token: &ScalarToken) -> Result<(), DuplicateField> {
        self.claim(name)?;
        self.continuation();
        self.field_name(name);
        match token {
            ScalarToken::Int(v) => self.buf.push_str(&v.to_string()),
            ScalarToken::Decimal(s) => self.buf.push_str(s),
            ScalarToken::Text(s) => {
                self.buf.push('"');
                self.buf.push_str(&escape_text(s));
                self.buf.push('"');
            }
            ScalarToken::Date(s) => {
                self.buf.push_str("ISODate(\"");
                self.buf.push_str(s);
                self.buf.push_str("\")");
            }
        }
        Ok(())
    }

    /// Open an array field. Elements follow via [`append_element`], then
    /// [`close_array`].
    ///
    /// [`append_element`]: JsonBuilder::append_element
    /// [`close_array`]: JsonBuilder::close_array
    pub fn open_array(&mut self, name: &str) -> Result<(), DuplicateField> {
        self.claim(name)?;
        self.continuation();
        self.field_name(name);
        self.buf.push_str("[ ");
        self.suppress_comma = true;
        Ok(())
    }

    /// Close the array opened by the matching [`open_array`].
    ///
    /// [`open_array`]: JsonBuilder::open_array
    pub fn close_array(&mut self) {
        self.buf.push_str(" ]");
        self.suppress_comma = false;
    }

    /// Name a field whose value is the next appended element, as a nested
    /// object rather than an array.
    pub fn set_object(&mut self, name: &str) -> Result<(), DuplicateField> {
        self.claim(name)?;
        self.continuation();
        self.field_name(name);
        self.suppress_comma = true;
        Ok(())
    }

    /// Append an already-rendered document, either as an array element or as
    /// the value announced by [`set_object`].
    ///
    /// [`set_object`]: JsonBuilder::set_object
    pub fn append_element(&mut self, rendered: &str) {
        self.continuation();
        self.buf.push_str(rendered);
    }

    /// Render the finished document, consuming the builder.
    pub fn render(self) -> String {
        let sep = if self.one_line { "" } else { "\n" };
        let mut out =
            String::with_capacity(self.buf.len() + 2 * self.out_pad.len() + 2 * sep.len() + 2);
        out.push_str(&self.out_pad);
        out.push('{');
        out.push_str(sep);
        out.push_str(&self.buf);
        out.push_str(sep);
        out.push_str(&self.out_pad);
        out.push('}');
        out
    }

    fn claim(&mut self, name: &str) -> Result<(), DuplicateField> {
        if !self.names.insert(name.to_string()) {
            return Err(DuplicateField(name.to_string()));
        }
        Ok(())
    }

    // Separator between entries. The comma is suppressed right after a label
    // was written; the line break is not, so a labeled object opens on the
    // following line in pretty mode.
    fn continuation(&mut self) {
        if self.buf.is_empty() {
            return;
        }
        if self.suppress_comma {
            self.suppress_comma = false;
        } else {
            self.buf.push(',');
        }
        if !self.one_line {
            self.buf.push('\n');
        }
    }

    fn field_name(&mut self, name: &str) {
        self.buf.push_str(&self.in_pad);
        self.buf.push('"');
        self.buf.push_str(name);
        self.buf.push_str("\": ");
    }
}

/// Escape a raw string value for inclusion in a document. Only the double
/// quote and the invisible/unassigned classes are touched; everything else
/// passes through verbatim, including multibyte text.
fn escape_text(raw: &str) -> String {
    if !NEEDS_ESCAPE.is_match(raw) {
        return raw.to_owned();
    }
    let mut escaped = String::with_capacity(raw.len() + 8);
    let mut utf8 = [0u8; 4];
    let mut utf16 = [0u16; 2];
    for ch in raw.chars() {
        if ch == '"' {
            escaped.push_str("\\\"");
        } else if NEEDS_ESCAPE.is_match(ch.encode_utf8(&mut utf8)) {
            for unit in ch.encode_utf16(&mut utf16).iter() {
                escaped.push_str(&format!("\\u{:04x}", unit));
            }
        } else {
            escaped.push(ch);
        }
    }
    escaped
}
