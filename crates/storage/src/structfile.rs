//! StructuredFile: a file of fixed-length records
//!
//! Records are addressed by index: record `i` lives at
//! `offset + i * record_size`, where `offset` is the first byte after the
//! identification block (or the caller-supplied offset for views that skip
//! the header). Every write is an immediate positioned write on the shared
//! handle, so any later read through any view of the same file observes it.
//!
//! Views created with [`StructuredFile::slice`] share the file handle and
//! layout; writes through a view land in the parent file.

use crate::header::{describe, identification_block};
use crate::layout::{decode_scalar, encode_scalar, Column, RecordLayout, Scalar};
use parking_lot::Mutex;
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;
use worlddb_core::{Error, Result};

/// A file handle shared between a StructuredFile and its views
pub type SharedFile = Arc<Mutex<File>>;

/// Open (creating if needed) a file for positioned reads and writes
pub fn open_shared(path: &Path) -> Result<SharedFile> {
    let file = OpenOptions::new()
        .create(true)
        .truncate(false)
        .read(true)
        .write(true)
        .open(path)?;
    Ok(Arc::new(Mutex::new(file)))
}

/// Read into `buf` starting at `pos`; bytes past end-of-file are left zero.
///
/// Returns the number of bytes actually present in the file.
pub(crate) fn read_at(file: &mut File, pos: u64, buf: &mut [u8]) -> Result<usize> {
    file.seek(SeekFrom::Start(pos))?;
    let mut filled = 0;
    while filled < buf.len() {
        let n = file.read(&mut buf[filled..])?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    buf[filled..].fill(0);
    Ok(filled)
}

/// Write all of `data` at `pos`
pub(crate) fn write_at(file: &mut File, pos: u64, data: &[u8]) -> Result<()> {
    file.seek(SeekFrom::Start(pos))?;
    file.write_all(data)?;
    Ok(())
}

/// Options for opening a StructuredFile
#[derive(Debug, Clone, Default)]
pub struct StructuredFileOptions {
    /// Byte offset of the identification block (or of record 0 when
    /// `ignore_schema` is set)
    pub offset: u64,
    /// Maximum number of records
    pub max_len: Option<u64>,
    /// Maximum size in bytes; converted to a record count
    pub max_size: Option<u64>,
    /// Skip writing and verifying the identification block
    pub ignore_schema: bool,
}

impl StructuredFileOptions {
    /// Set the starting byte offset
    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = offset;
        self
    }

    /// Limit the record count
    pub fn max_len(mut self, max_len: u64) -> Self {
        self.max_len = Some(max_len);
        self
    }

    /// Limit the byte size
    pub fn max_size(mut self, max_size: u64) -> Self {
        self.max_size = Some(max_size);
        self
    }

    /// Do not write or check an identification block
    pub fn ignore_schema(mut self) -> Self {
        self.ignore_schema = true;
        self
    }
}

/// A file (or window of a file) of fixed-width records
#[derive(Clone)]
pub struct StructuredFile {
    file: SharedFile,
    path: Arc<PathBuf>,
    layout: Arc<RecordLayout>,
    /// Byte offset of record 0
    offset: u64,
    max_len: Option<u64>,
}

impl fmt::Debug for StructuredFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StructuredFile")
            .field("path", &self.path)
            .field("format", &self.layout.format_string())
            .field("offset", &self.offset)
            .field("max_len", &self.max_len)
            .finish()
    }
}

impl StructuredFile {
    /// Open a schema-checked file with default options
    pub fn open(path: impl AsRef<Path>, layout: RecordLayout) -> Result<Self> {
        Self::open_with(path, Arc::new(layout), StructuredFileOptions::default())
    }

    /// Open a file with explicit options
    pub fn open_with(
        path: impl AsRef<Path>,
        layout: Arc<RecordLayout>,
        opts: StructuredFileOptions,
    ) -> Result<Self> {
        let path = path.as_ref();
        let file = open_shared(path)?;
        Self::over(file, path, layout, opts)
    }

    /// Build a StructuredFile over an already-open handle.
    ///
    /// Unless `ignore_schema` is set, an empty region gets a fresh
    /// identification block and a non-empty one must match it exactly.
    pub fn over(
        file: SharedFile,
        path: &Path,
        layout: Arc<RecordLayout>,
        opts: StructuredFileOptions,
    ) -> Result<Self> {
        let max_len = match (opts.max_len, opts.max_size) {
            (Some(_), Some(_)) => {
                return Err(Error::invalid_operation(
                    "max_len and max_size are mutually exclusive",
                ))
            }
            (Some(len), None) => Some(len),
            (None, Some(size)) => Some(size / layout.record_size() as u64),
            (None, None) => None,
        };
        let mut sf = StructuredFile {
            file,
            path: Arc::new(path.to_path_buf()),
            layout,
            offset: opts.offset,
            max_len,
        };
        if !opts.ignore_schema {
            sf.verify_or_write_header()?;
        }
        Ok(sf)
    }

    fn verify_or_write_header(&mut self) -> Result<()> {
        let block = identification_block(&self.layout);
        let mut file = self.file.lock();
        let file_len = file.metadata()?.len();
        if file_len <= self.offset {
            write_at(&mut file, self.offset, &block)?;
            debug!(
                target: "worlddb::storage",
                path = %self.path.display(),
                format = %self.layout.format_string(),
                "Wrote identification block"
            );
        } else {
            let mut existing = vec![0u8; block.len()];
            let present = read_at(&mut file, self.offset, &mut existing)?;
            if present < block.len() || existing != block {
                return Err(Error::SchemaMismatch {
                    path: self.path.as_ref().clone(),
                    detail: format!(
                        "expected {}; found {}",
                        describe(&block),
                        describe(&existing[..present])
                    ),
                });
            }
        }
        drop(file);
        self.offset += block.len() as u64;
        Ok(())
    }

    /// Path of the underlying file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The record layout
    pub fn layout(&self) -> &RecordLayout {
        &self.layout
    }

    /// Size of one record in bytes
    pub fn record_size(&self) -> usize {
        self.layout.record_size()
    }

    /// Byte offset of record 0 within the file
    pub fn data_offset(&self) -> u64 {
        self.offset
    }

    /// Configured record limit
    pub fn max_len(&self) -> Option<u64> {
        self.max_len
    }

    /// Position of a named column
    pub fn column_index(&self, field: &str) -> Option<usize> {
        self.layout.column_index(field)
    }

    fn check_index(&self, at: u64) -> Result<()> {
        match self.max_len {
            Some(max) if at >= max => Err(Error::Bounds { index: at, max }),
            _ => Ok(()),
        }
    }

    fn record_pos(&self, at: u64) -> u64 {
        self.offset + at * self.layout.record_size() as u64
    }

    fn column(&self, index: usize) -> Result<&Column> {
        self.layout.columns().get(index).ok_or_else(|| {
            Error::invalid_operation(format!(
                "column {} out of range for {} ({} columns)",
                index,
                self.path.display(),
                self.layout.columns().len()
            ))
        })
    }

    fn field_index(&self, field: &str) -> Result<usize> {
        self.layout.column_index(field).ok_or_else(|| {
            Error::invalid_operation(format!(
                "no column '{}' in {}",
                field,
                self.path.display()
            ))
        })
    }

    /// Number of records: whole records past the header, clamped to the
    /// configured maximum.
    pub fn len(&self) -> Result<u64> {
        let file_len = self.file.lock().metadata()?.len();
        let possible = file_len.saturating_sub(self.offset) / self.layout.record_size() as u64;
        Ok(match self.max_len {
            Some(max) => possible.min(max),
            None => possible,
        })
    }

    /// Whether the file holds no records
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    fn read_raw(&self, at: u64) -> Result<Vec<u8>> {
        self.check_index(at)?;
        let mut buf = vec![0u8; self.layout.record_size()];
        read_at(&mut self.file.lock(), self.record_pos(at), &mut buf)?;
        Ok(buf)
    }

    fn write_raw(&self, at: u64, bytes: &[u8]) -> Result<()> {
        self.check_index(at)?;
        write_at(&mut self.file.lock(), self.record_pos(at), bytes)
    }

    /// Read a full record. Records past end-of-file read as zeroes.
    pub fn get_all(&self, at: u64) -> Result<Vec<Scalar>> {
        let raw = self.read_raw(at)?;
        Ok(self.layout.decode(&raw))
    }

    /// Write a full record
    pub fn set_all(&self, at: u64, values: &[Scalar]) -> Result<()> {
        let bytes = self.layout.encode(values)?;
        self.write_raw(at, &bytes)
    }

    /// Read one column by position
    pub fn get_column(&self, at: u64, index: usize) -> Result<Scalar> {
        self.check_index(at)?;
        let column = self.column(index)?;
        let mut buf = vec![0u8; column.kind.size()];
        let pos = self.record_pos(at) + self.layout.column_offset(index) as u64;
        read_at(&mut self.file.lock(), pos, &mut buf)?;
        Ok(decode_scalar(column.kind, &buf))
    }

    /// Write one column by position
    pub fn set_column(&self, at: u64, index: usize, value: &Scalar) -> Result<()> {
        self.check_index(at)?;
        let column = self.column(index)?;
        let mut buf = vec![0u8; column.kind.size()];
        encode_scalar(column, value, &mut buf)?;
        let pos = self.record_pos(at) + self.layout.column_offset(index) as u64;
        write_at(&mut self.file.lock(), pos, &buf)
    }

    /// Read one column by name
    pub fn get_at(&self, at: u64, field: &str) -> Result<Scalar> {
        let index = self.field_index(field)?;
        self.get_column(at, index)
    }

    /// Write one column by name
    pub fn set_at(&self, at: u64, field: &str, value: &Scalar) -> Result<()> {
        let index = self.field_index(field)?;
        self.set_column(at, index, value)
    }

    /// Append a record after the last one, returning its index
    pub fn append(&self, values: &[Scalar]) -> Result<u64> {
        let at = self.len()?;
        self.set_all(at, values)?;
        Ok(at)
    }

    /// Grow by `count` zero-filled records
    pub fn expand(&self, count: u64) -> Result<()> {
        if count == 0 {
            return Ok(());
        }
        let len = self.len()?;
        self.check_index(len + count - 1)?;
        let zeros = vec![0u8; count as usize * self.layout.record_size()];
        write_at(&mut self.file.lock(), self.record_pos(len), &zeros)
    }

    /// Iterate over records `0..len()`
    pub fn iter(&self) -> Result<Records<'_>> {
        let end = self.len()?;
        Ok(Records {
            file: self,
            next: 0,
            end,
        })
    }

    /// Read records from `begin` towards `end`.
    ///
    /// When `begin > end` the records are read backwards: `begin`,
    /// `begin - 1`, ... down to `end + 1`.
    pub fn records(&self, begin: u64, end: u64) -> Result<Vec<Vec<Scalar>>> {
        if begin <= end {
            (begin..end).map(|at| self.get_all(at)).collect()
        } else {
            ((end + 1)..=begin).rev().map(|at| self.get_all(at)).collect()
        }
    }

    /// Write consecutive records starting at `begin`
    pub fn set_range(&self, begin: u64, records: &[Vec<Scalar>]) -> Result<()> {
        for (i, record) in records.iter().enumerate() {
            self.set_all(begin + i as u64, record)?;
        }
        Ok(())
    }

    /// A live view of records `begin..end`
    pub fn slice(&self, begin: u64, end: u64) -> Result<StructuredFile> {
        if end < begin {
            return Err(Error::invalid_operation(format!(
                "slice end {} before begin {}",
                end, begin
            )));
        }
        if let Some(max) = self.max_len {
            if end > max {
                return Err(Error::Bounds { index: end, max });
            }
        }
        let mut view = self.slice_from(begin);
        view.max_len = Some(end - begin);
        Ok(view)
    }

    /// A live, unbounded view starting at record `begin`
    pub fn slice_from(&self, begin: u64) -> StructuredFile {
        StructuredFile {
            file: Arc::clone(&self.file),
            path: Arc::clone(&self.path),
            layout: Arc::clone(&self.layout),
            offset: self.record_pos(begin),
            max_len: self.max_len.map(|max| max.saturating_sub(begin)),
        }
    }

    /// Move `count` records from `from` to `to` within this file.
    ///
    /// Overlapping ranges are handled: when the destination starts inside
    /// the source the copy runs backwards, otherwise forwards.
    pub fn copy_block(&self, from: u64, to: u64, count: u64) -> Result<()> {
        if from == to || count == 0 {
            return Ok(());
        }
        if to > from && to - from < count {
            for i in (0..count).rev() {
                let raw = self.read_raw(from + i)?;
                self.write_raw(to + i, &raw)?;
            }
        } else {
            for i in 0..count {
                let raw = self.read_raw(from + i)?;
                self.write_raw(to + i, &raw)?;
            }
        }
        Ok(())
    }

    /// Flush buffered writes to the OS
    pub fn flush(&self) -> Result<()> {
        self.file.lock().flush()?;
        Ok(())
    }

    /// Flush and fsync the underlying file
    pub fn sync(&self) -> Result<()> {
        let mut file = self.file.lock();
        file.flush()?;
        file.sync_all()?;
        Ok(())
    }
}

/// Forward iterator over a StructuredFile's records
pub struct Records<'a> {
    file: &'a StructuredFile,
    next: u64,
    end: u64,
}

impl Iterator for Records<'_> {
    type Item = Result<Vec<Scalar>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next >= self.end {
            return None;
        }
        let at = self.next;
        self.next += 1;
        Some(self.file.get_all(at))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = (self.end - self.next) as usize;
        (remaining, Some(remaining))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::ColumnKind;
    use tempfile::TempDir;

    fn xy_layout() -> RecordLayout {
        RecordLayout::of(&[(ColumnKind::Int32, "x"), (ColumnKind::Int32, "y")]).unwrap()
    }

    fn pair(x: i32, y: i32) -> Vec<Scalar> {
        vec![Scalar::Int(x), Scalar::Int(y)]
    }

    fn mixed_layout() -> RecordLayout {
        RecordLayout::of(&[
            (ColumnKind::Int32, "x"),
            (ColumnKind::Float64, "y"),
            (ColumnKind::Bool, "z"),
            (ColumnKind::Int64, "a"),
        ])
        .unwrap()
    }

    #[test]
    fn test_len_and_append() {
        let dir = TempDir::new().unwrap();
        let sf = StructuredFile::open(dir.path().join("sf"), mixed_layout()).unwrap();
        assert_eq!(sf.len().unwrap(), 0);

        let rec = vec![
            Scalar::Int(1),
            Scalar::Float(2.0),
            Scalar::Bool(true),
            Scalar::Long(4),
        ];
        sf.append(&rec).unwrap();
        assert_eq!(sf.len().unwrap(), 1);

        let view = sf.slice_from(1);
        assert_eq!(view.len().unwrap(), 0);
        view.append(&rec).unwrap();
        assert_eq!(view.len().unwrap(), 1);
        assert_eq!(sf.len().unwrap(), 2);

        sf.append(&rec).unwrap();
        assert_eq!(sf.len().unwrap(), 3);
    }

    #[test]
    fn test_sparse_records() {
        let dir = TempDir::new().unwrap();
        let sf = StructuredFile::open(dir.path().join("sf"), mixed_layout()).unwrap();
        let one = vec![
            Scalar::Int(1),
            Scalar::Float(43.4),
            Scalar::Bool(true),
            Scalar::Long(1_234_123_512_334),
        ];
        let two = vec![
            Scalar::Int(3453),
            Scalar::Float(332.0),
            Scalar::Bool(false),
            Scalar::Long(2_134_555_234),
        ];
        sf.set_all(0, &one).unwrap();
        sf.set_all(2345, &two).unwrap();
        assert_eq!(sf.get_all(0).unwrap(), one);
        assert_eq!(sf.get_all(2345).unwrap(), two);
        assert_eq!(sf.get_all(100).unwrap(), mixed_layout().zero_record());
        assert_eq!(sf.len().unwrap(), 2346);
    }

    #[test]
    fn test_column_access() {
        let dir = TempDir::new().unwrap();
        let sf = StructuredFile::open(dir.path().join("sf"), mixed_layout()).unwrap();
        sf.set_at(0, "z", &Scalar::Bool(false)).unwrap();
        assert_eq!(sf.get_at(0, "z").unwrap(), Scalar::Bool(false));

        sf.set_at(2345, "a", &Scalar::Long(123_412_341_231_234)).unwrap();
        assert_eq!(sf.get_at(2345, "a").unwrap(), Scalar::Long(123_412_341_231_234));
        assert_eq!(sf.get_at(2345, "x").unwrap(), Scalar::Int(0));

        assert!(sf.get_at(0, "nope").is_err());
        assert!(sf.set_at(0, "x", &Scalar::Bool(true)).is_err());
    }

    #[test]
    fn test_column_index_out_of_range() {
        let dir = TempDir::new().unwrap();
        let sf = StructuredFile::open(dir.path().join("sf"), mixed_layout()).unwrap();
        sf.set_column(0, 3, &Scalar::Long(7)).unwrap();
        assert_eq!(sf.get_column(0, 3).unwrap(), Scalar::Long(7));
        assert!(matches!(
            sf.get_column(0, 4),
            Err(Error::InvalidOperation(_))
        ));
        assert!(matches!(
            sf.set_column(0, 99, &Scalar::Int(1)),
            Err(Error::InvalidOperation(_))
        ));
        assert_eq!(sf.get_all(0).unwrap()[3], Scalar::Long(7));
    }

    #[test]
    fn test_offset_and_max_size() {
        let dir = TempDir::new().unwrap();
        let opts = StructuredFileOptions::default().offset(60).max_size(100);
        let sf = StructuredFile::open_with(dir.path().join("sf"), Arc::new(xy_layout()), opts)
            .unwrap();
        assert_eq!(sf.max_len(), Some(12));

        for x in 0..10 {
            sf.set_all(x as u64, &pair(x, x + 1)).unwrap();
            assert_eq!(sf.get_all(x as u64).unwrap(), pair(x, x + 1));
        }
        for x in (0..10).rev() {
            assert_eq!(sf.get_all(x as u64).unwrap(), pair(x, x + 1));
        }

        let aaaa = 0x6161_6161;
        sf.set_all(0, &pair(aaaa, aaaa)).unwrap();
        let mut first = [0u8; 1];
        read_at(&mut sf.file.lock(), sf.data_offset(), &mut first).unwrap();
        assert_eq!(&first, b"a");

        assert!(matches!(
            sf.set_all(12, &pair(0, 0)),
            Err(Error::Bounds { index: 12, max: 12 })
        ));
    }

    #[test]
    fn test_schema_guard() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("guarded");
        {
            let sf = StructuredFile::open(&path, xy_layout()).unwrap();
            sf.append(&pair(1, 2)).unwrap();
        }

        // Same layout reopens fine and sees the data
        let sf = StructuredFile::open(&path, xy_layout()).unwrap();
        assert_eq!(sf.get_all(0).unwrap(), pair(1, 2));

        // Reordered columns are rejected
        let reordered =
            RecordLayout::of(&[(ColumnKind::Int32, "y"), (ColumnKind::Int32, "x")]).unwrap();
        let err = StructuredFile::open(&path, reordered).unwrap_err();
        assert!(matches!(err, Error::SchemaMismatch { .. }));

        // Different types are rejected
        let retyped =
            RecordLayout::of(&[(ColumnKind::Int64, "x"), (ColumnKind::Int32, "y")]).unwrap();
        assert!(matches!(
            StructuredFile::open(&path, retyped),
            Err(Error::SchemaMismatch { .. })
        ));
    }

    #[test]
    fn test_truncated_header_is_mismatch() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("short");
        std::fs::write(&path, b"SF01").unwrap();
        assert!(matches!(
            StructuredFile::open(&path, xy_layout()),
            Err(Error::SchemaMismatch { .. })
        ));
    }

    #[test]
    fn test_iteration_restarts() {
        let dir = TempDir::new().unwrap();
        let sf = StructuredFile::open(dir.path().join("sf"), xy_layout()).unwrap();
        for n in 0..10 {
            sf.append(&pair(n, n * 2)).unwrap();
        }
        for _ in 0..2 {
            let all: Vec<_> = sf.iter().unwrap().map(|r| r.unwrap()).collect();
            assert_eq!(all.len(), 10);
            assert_eq!(all[7], pair(7, 14));
        }
        let backwards = sf.records(4, 1).unwrap();
        assert_eq!(backwards, vec![pair(4, 8), pair(3, 6), pair(2, 4)]);
    }

    #[test]
    fn test_slice_writes_propagate() {
        let dir = TempDir::new().unwrap();
        let sf = StructuredFile::open(dir.path().join("sf"), xy_layout()).unwrap();
        for n in 0..20 {
            sf.append(&pair(n, n)).unwrap();
        }
        let view = sf.slice(5, 10).unwrap();
        assert_eq!(view.len().unwrap(), 5);
        assert_eq!(view.get_all(0).unwrap(), pair(5, 5));
        view.set_all(1, &pair(-1, -1)).unwrap();
        assert_eq!(sf.get_all(6).unwrap(), pair(-1, -1));
        assert!(view.get_all(5).is_err());
    }

    fn numbered(n: u64) -> (TempDir, StructuredFile) {
        let dir = TempDir::new().unwrap();
        let sf = StructuredFile::open(dir.path().join("blocks"), xy_layout()).unwrap();
        for i in 0..n as i32 {
            sf.append(&pair(i, i)).unwrap();
        }
        (dir, sf)
    }

    fn column_x(sf: &StructuredFile, begin: u64, end: u64) -> Vec<i32> {
        sf.records(begin, end)
            .unwrap()
            .into_iter()
            .map(|r| match r[0] {
                Scalar::Int(v) => v,
                _ => unreachable!(),
            })
            .collect()
    }

    #[test]
    fn test_copy_block_disjoint() {
        let (_dir, sf) = numbered(100);
        sf.copy_block(10, 80, 10).unwrap();
        assert_eq!(column_x(&sf, 5, 15), (5..15).collect::<Vec<_>>());
        let expected: Vec<i32> = (75..80).chain(10..20).chain(90..95).collect();
        assert_eq!(column_x(&sf, 75, 95), expected);
    }

    #[test]
    fn test_copy_block_overlap_left() {
        let (_dir, sf) = numbered(100);
        sf.copy_block(5, 10, 50).unwrap();
        let expected: Vec<i32> = (0..10).chain(5..55).collect();
        assert_eq!(column_x(&sf, 0, 60), expected);
    }

    #[test]
    fn test_copy_block_overlap_right() {
        let (_dir, sf) = numbered(100);
        sf.copy_block(10, 5, 50).unwrap();
        let expected: Vec<i32> = (0..5).chain(10..60).chain(55..60).collect();
        assert_eq!(column_x(&sf, 0, 60), expected);
    }
}
