//! StructuredFile identification block
//!
//! Every schema-checked StructuredFile starts with an identification block
//! that describes its record layout. It is written once when the file is
//! empty and compared byte-for-byte on every later open.
//!
//! # Format
//!
//! ```text
//! +----------------------+
//! | Version tag "SF01"   | 4 bytes
//! | Record size          | 4 bytes (u32 BE)
//! | Header record count  | 4 bytes (u32 BE)
//! | Format string        | NUL-joined with the field names
//! | Zero padding         | up to count * record size
//! +----------------------+
//! ```

use crate::layout::RecordLayout;
use byteorder::{BigEndian, ByteOrder};

/// Version tag for the identification block
pub const VERSION_TAG: [u8; 4] = *b"SF01";

/// Fixed prefix: tag + record size + header record count
pub const HEADER_PREFIX_LEN: usize = 12;

/// Build the identification block for a layout
pub fn identification_block(layout: &RecordLayout) -> Vec<u8> {
    let ident = ident_string(layout);
    let record_size = layout.record_size();
    let min_size = HEADER_PREFIX_LEN + ident.len();
    let header_records = min_size.div_ceil(record_size);

    let mut block = Vec::with_capacity(header_records * record_size);
    block.extend_from_slice(&VERSION_TAG);
    let mut word = [0u8; 4];
    BigEndian::write_u32(&mut word, record_size as u32);
    block.extend_from_slice(&word);
    BigEndian::write_u32(&mut word, header_records as u32);
    block.extend_from_slice(&word);
    block.extend_from_slice(&ident);
    block.resize(header_records * record_size, 0);
    block
}

/// The NUL-joined format string and field names
fn ident_string(layout: &RecordLayout) -> Vec<u8> {
    let mut parts = vec![layout.format_string()];
    parts.extend(layout.field_names().into_iter().map(str::to_string));
    parts.join("\0").into_bytes()
}

/// Human-readable summary of a stored block, for mismatch reports
pub fn describe(block: &[u8]) -> String {
    if block.len() < HEADER_PREFIX_LEN {
        return format!("truncated header ({} bytes)", block.len());
    }
    let tag = String::from_utf8_lossy(&block[..4]);
    let record_size = BigEndian::read_u32(&block[4..8]);
    let header_records = BigEndian::read_u32(&block[8..12]);
    let ident: Vec<String> = block[HEADER_PREFIX_LEN..]
        .split(|b| *b == 0)
        .filter(|part| !part.is_empty())
        .map(|part| String::from_utf8_lossy(part).into_owned())
        .collect();
    format!(
        "tag {:?}, record size {}, {} header records, layout [{}]",
        tag,
        record_size,
        header_records,
        ident.join(", ")
    )
}
