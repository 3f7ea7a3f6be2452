//! String table entries
//!
//! Strings come from `key = value` text files and/or inline manifest tables.
//! The payload is a small hash table (see `fudge_common::formats::string_table`)
//! followed by a blob of null-terminated strings; identical values are
//! stored once.

use fudge_common::{FormatError, StringSlot, StringTableHeader, align_up, build_table, hash_str};
use hashbrown::HashMap;
use serde::Deserialize;
use tracing::debug;

use crate::error::ExportError;

/// Text encoding of the string blob
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
pub enum StringEncoding {
    #[default]
    #[serde(rename = "ascii")]
    Ascii,
    #[serde(rename = "utf-8", alias = "utf8")]
    Utf8,
}

impl StringEncoding {
    pub fn name(self) -> &'static str {
        match self {
            StringEncoding::Ascii => "ascii",
            StringEncoding::Utf8 => "utf-8",
        }
    }

    fn encode(self, value: &str) -> Option<&[u8]> {
        match self {
            StringEncoding::Ascii if !value.is_ascii() => None,
            _ if value.contains('\0') => None,
            _ => Some(value.as_bytes()),
        }
    }
}

/// Ordered key/value list where a later value replaces an earlier one
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StringEntries {
    entries: Vec<(String, String)>,
    positions: HashMap<String, usize>,
}

impl StringEntries {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: String, value: String) {
        match self.positions.get(&key) {
            Some(&index) => self.entries[index].1 = value,
            None => {
                self.positions.insert(key.clone(), self.entries.len());
                self.entries.push((key, value));
            }
        }
    }

    pub fn extend(&mut self, entries: impl IntoIterator<Item = (String, String)>) {
        for (key, value) in entries {
            self.insert(key, value);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// Strip a `#` comment, ignoring any inside quotes
fn strip_comment(line: &str) -> &str {
    let mut quote = None;
    for (index, ch) in line.char_indices() {
        match (quote, ch) {
            (None, '"' | '\'') => quote = Some(ch),
            (Some(q), _) if ch == q => quote = None,
            (None, '#') => return &line[..index],
            _ => {}
        }
    }
    line
}

/// Remove surrounding quotes and resolve backslash escapes
fn unquote(value: &str) -> String {
    let quote = match value.chars().next() {
        Some(q @ ('"' | '\'')) => q,
        _ => return value.to_string(),
    };
    let inner = value[1..].strip_suffix(quote).unwrap_or(&value[1..]);

    let mut output = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            output.push(ch);
            continue;
        }
        match chars.next() {
            Some('n') => output.push('\n'),
            Some('t') => output.push('\t'),
            Some('r') => output.push('\r'),
            Some(other) => output.push(other),
            None => output.push('\\'),
        }
    }
    output
}

/// Parse `key = value` lines
///
/// Blank lines and `#` comments are skipped. Values may be quoted to keep
/// leading/trailing spaces or a `#`.
pub fn parse_key_value(text: &str) -> Result<Vec<(String, String)>, ExportError> {
    let mut entries = Vec::new();

    for (number, line) in text.lines().enumerate() {
        let line = strip_comment(line);
        if line.trim().is_empty() {
            continue;
        }

        let Some((key, value)) = line.split_once('=') else {
            return Err(ExportError::MalformedLine {
                line: number + 1,
                text: line.to_string(),
            });
        };

        entries.push((key.trim().to_string(), unquote(value.trim())));
    }

    Ok(entries)
}

/// Serialize a string table entry
///
/// Each string is followed by a null terminator and the blob is padded to
/// `align` after every string. Slot offsets are relative to the start of the
/// table and must fit in 16 bits.
pub fn build_string_table(
    name: &str,
    entries: &StringEntries,
    encoding: StringEncoding,
    align: usize,
) -> Result<Vec<u8>, ExportError> {
    let align = align.max(1);
    let mut blob = Vec::new();
    let mut offsets: HashMap<&str, usize> = HashMap::new();
    let mut pending = Vec::with_capacity(entries.len());

    for (key, value) in entries.iter() {
        if let Some(&offset) = offsets.get(value) {
            pending.push((hash_str(key), offset));
            continue;
        }

        let bytes = encoding.encode(value).ok_or_else(|| ExportError::InvalidString {
            name: name.to_string(),
            key: key.to_string(),
            encoding: encoding.name(),
        })?;

        let offset = blob.len();
        blob.extend_from_slice(bytes);
        blob.push(0);
        blob.resize(align_up(blob.len(), align), 0);

        offsets.insert(value, offset);
        pending.push((hash_str(key), offset));
    }

    let table = build_table(pending)?;
    FormatError::check("string table buckets", table.buckets(), u16::MAX as usize)?;
    FormatError::check("string table chained slots", table.chained(), u16::MAX as usize)?;

    let header = StringTableHeader::new(table.buckets() as u16, table.chained() as u16);
    let base = header.blob_offset();

    let mut data = Vec::with_capacity(base + blob.len());
    data.extend_from_slice(&header.to_bytes());
    for slot in table.slots() {
        let offset = match slot.value {
            Some(offset) => {
                FormatError::check("string offset", base + offset, u16::MAX as usize)?;
                (base + offset) as u16
            }
            None => 0,
        };
        let slot = StringSlot {
            hash: slot.hash,
            offset,
            chain: slot.chain,
        };
        data.extend_from_slice(&slot.to_bytes());
    }
    data.extend_from_slice(&blob);

    debug!(
        "({name}) {} strings, {} unique, {} bytes",
        entries.len(),
        offsets.len(),
        data.len()
    );
    Ok(data)
}
