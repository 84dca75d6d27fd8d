//! CSV source reader
//!
//! Streams a delimited file as [`RawRecord`]s keyed by the header row. Only
//! one record is decoded at a time; the file handle is owned by the
//! [`RecordStream`] and closed when it is dropped, whether or not the stream
//! was exhausted.

use csv::{ByteRecord, Reader, ReaderBuilder};
use std::collections::HashMap;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::{EtlError, EtlResult};

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// How field bytes are turned into text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TextEncoding {
    /// UTF-8 only; undecodable bytes abort the run.
    Utf8,
    /// UTF-8, falling back to ISO-8859-1 for fields that are not valid UTF-8.
    #[default]
    Utf8OrLatin1,
}

impl TextEncoding {
    fn decode(self, bytes: &[u8]) -> Option<String> {
        match std::str::from_utf8(bytes) {
            Ok(s) => Some(s.to_string()),
            Err(_) => match self {
                TextEncoding::Utf8 => None,
                TextEncoding::Utf8OrLatin1 => Some(bytes.iter().map(|&b| b as char).collect()),
            },
        }
    }
}

#[derive(Debug)]
pub struct Header {
    names: Vec<String>,
    positions: HashMap<String, usize>,
}

impl Header {
    pub fn from_names(names: Vec<String>) -> Self {
        // duplicate names: the last occurrence wins
        let positions = names
            .iter()
            .enumerate()
            .map(|(i, n)| (n.clone(), i))
            .collect();
        Self { names, positions }
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.positions.get(name).copied()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.positions.contains_key(name)
    }
}

/// One source line, addressed by header name.
#[derive(Debug, Clone)]
pub struct RawRecord {
    header: Arc<Header>,
    fields: Vec<String>,
    line: u64,
}

impl RawRecord {
    pub fn new(header: Arc<Header>, fields: Vec<String>, line: u64) -> Self {
        Self {
            header,
            fields,
            line,
        }
    }

    /// Raw value of `column`, or `None` when the header has no such column
    /// or this line is too short to reach it.
    pub fn get(&self, column: &str) -> Option<&str> {
        self.header
            .position(column)
            .and_then(|i| self.fields.get(i))
            .map(String::as_str)
    }

    pub fn line(&self) -> u64 {
        self.line
    }
}

/// A re-openable CSV file.
#[derive(Debug, Clone)]
pub struct CsvSource {
    path: PathBuf,
    encoding: TextEncoding,
    delimiter: u8,
}

impl CsvSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            encoding: TextEncoding::default(),
            delimiter: b',',
        }
    }

    pub fn with_encoding(mut self, encoding: TextEncoding) -> Self {
        self.encoding = encoding;
        self
    }

    pub fn with_delimiter(mut self, delimiter: u8) -> Self {
        self.delimiter = delimiter;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Open the file and validate its header. Each call starts from the top.
    pub fn open(&self) -> EtlResult<RecordStream> {
        let file = File::open(&self.path).map_err(|source| EtlError::SourceNotFound {
            path: self.path.clone(),
            source,
        })?;

        let mut reader = ReaderBuilder::new()
            .delimiter(self.delimiter)
            .has_headers(true)
            .flexible(true)
            .from_reader(file);

        let header = self.read_header(&mut reader)?;

        Ok(RecordStream {
            reader,
            header: Arc::new(header),
            path: self.path.clone(),
            encoding: self.encoding,
            buffer: ByteRecord::new(),
        })
    }

    fn read_header(&self, reader: &mut Reader<File>) -> EtlResult<Header> {
        let malformed = |reason: String| EtlError::MalformedHeader {
            path: self.path.clone(),
            reason,
        };

        let raw = reader
            .byte_headers()
            .map_err(|e| malformed(e.to_string()))?;

        let mut names = Vec::with_capacity(raw.len());
        for (i, field) in raw.iter().enumerate() {
            // the mark is stripped as bytes, ahead of any Latin-1 fallback
            let field = match i {
                0 => field.strip_prefix(UTF8_BOM).unwrap_or(field),
                _ => field,
            };
            let name = self
                .encoding
                .decode(field)
                .ok_or_else(|| malformed(format!("column {} is not valid UTF-8", i + 1)))?;
            names.push(name);
        }

        if names.iter().all(|n| n.trim().is_empty()) {
            return Err(malformed("header row is missing or empty".to_string()));
        }

        Ok(Header::from_names(names))
    }
}

/// Lazy iterator over the records of an open [`CsvSource`].
pub struct RecordStream {
    reader: Reader<File>,
    header: Arc<Header>,
    path: PathBuf,
    encoding: TextEncoding,
    buffer: ByteRecord,
}

impl RecordStream {
    pub fn header(&self) -> &Header {
        &self.header
    }

    fn read_error(&self, line: u64, message: impl Into<String>) -> EtlError {
        EtlError::SourceRead {
            path: self.path.clone(),
            line,
            message: message.into(),
        }
    }
}

impl Iterator for RecordStream {
    type Item = EtlResult<RawRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.reader.read_byte_record(&mut self.buffer) {
            Ok(false) => None,
            Ok(true) => {
                let line = self.buffer.position().map(|p| p.line()).unwrap_or_default();
                let mut fields = Vec::with_capacity(self.buffer.len());
                for (i, bytes) in self.buffer.iter().enumerate() {
                    match self.encoding.decode(bytes) {
                        Some(text) => fields.push(text),
                        None => {
                            return Some(Err(self.read_error(
                                line,
                                format!("field {} is not valid UTF-8", i + 1),
                            )))
                        },
                    }
                }
                Some(Ok(RawRecord::new(Arc::clone(&self.header), fields, line)))
            },
            Err(e) => {
                let line = e.position().map(|p| p.line()).unwrap_or_default();
                Some(Err(self.read_error(line, e.to_string())))
            },
        }
    }
}
