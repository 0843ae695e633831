//! Fixed-width action-list records returned by the query command.
//!
//! Each record starts with a 32-byte NUL-padded name followed by an opaque
//! metadata block. Firmware revisions disagree on the record width, so the
//! layout is chosen by configuration.

use bytes::Bytes;
use tracing::warn;

use crate::builder::NAME_FIELD_LEN;

/// Width of one record in a query response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RecordLayout {
    /// 32-byte name + 4 bytes of metadata.
    #[default]
    Compact,
    /// 32-byte name + 44 bytes of metadata.
    Extended,
}

impl RecordLayout {
    pub fn width(self) -> usize {
        match self {
            RecordLayout::Compact => 36,
            RecordLayout::Extended => 76,
        }
    }

    pub fn from_width(width: usize) -> Option<Self> {
        match width {
            36 => Some(RecordLayout::Compact),
            76 => Some(RecordLayout::Extended),
            _ => None,
        }
    }
}

/// One stored taught action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionListEntry {
    /// Position in the listing; the index used by play-by-index.
    pub index: u16,
    pub name: String,
    pub metadata: Bytes,
}

/// Split `payload` into records, numbering them from `first_index`.
///
/// Records whose name field is empty are unused slots; they are skipped but
/// still consume an index. A trailing partial record is dropped with a
/// warning.
pub fn parse_records(payload: &[u8], layout: RecordLayout, first_index: u16) -> Vec<ActionListEntry> {
    let width = layout.width();
    let chunks = payload.chunks_exact(width);
    let remainder = chunks.remainder().len();
    if remainder != 0 {
        warn!(remainder, width, "action list payload has a partial trailing record");
    }

    chunks
        .enumerate()
        .filter_map(|(i, record)| {
            let name = decode_name(&record[..NAME_FIELD_LEN]);
            if name.is_empty() {
                return None;
            }
            Some(ActionListEntry {
                index: first_index.wrapping_add(i as u16),
                name,
                metadata: Bytes::copy_from_slice(&record[NAME_FIELD_LEN..]),
            })
        })
        .collect()
}

/// Number of record slots `payload` holds, partial records excluded.
pub fn record_count(payload: &[u8], layout: RecordLayout) -> usize {
    payload.len() / layout.width()
}

fn decode_name(field: &[u8]) -> String {
    let end = field.iter().position(|&b| b == 0).unwrap_or(field.len());
    String::from_utf8_lossy(&field[..end]).into_owned()
}

/// Find an entry by exact name.
pub fn find_by_name<'a>(entries: &'a [ActionListEntry], name: &str) -> Option<&'a ActionListEntry> {
    entries.iter().find(|e| e.name == name)
}
