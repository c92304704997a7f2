//! In-memory store for finished documents, and the dump that flushes it.

use std::collections::HashMap;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

/// Finished document texts keyed by natural id. Lives for one run per
/// document type; iteration order is unspecified.
#[derive(Debug, Default)]
pub struct DocumentStore {
    docs: HashMap<i64, String>,
}

impl DocumentStore {
    pub fn new() -> Self {
        DocumentStore::default()
    }

    /// Insert or replace the document for `id`.
    pub fn put(&mut self, id: i64, text: String) {
        self.docs.insert(id, text);
    }

    pub fn get(&self, id: i64) -> Option<&str> {
        self.docs.get(&id).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    /// Write every stored document to `sink`, one `writeln!` each, and
    /// return how many were written.
    pub fn dump_all<W: Write>(&self, sink: &mut W) -> io::Result<usize> {
        let mut written = 0;
        for text in self.docs.values() {
            writeln!(sink, "{}", text)?;
            written += 1;
        }
        Ok(written)
    }

    /// Dump to a file, creating or truncating it.
    pub fn dump_to_path<P: AsRef<Path>>(&self, path: P) -> io::Result<usize> {
        let mut sink = BufWriter::new(File::create(path)?);
        let written = self.dump_all(&mut sink)?;
        sink.flush()?;
        Ok(written)
    }
}
