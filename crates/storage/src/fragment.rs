//! First-fit fragment allocator
//!
//! A FragmentFile hands out byte ranges of one data file. It keeps two
//! record files next to the data:
//!
//! - `allocations`: `(oid, offset, length)` for every live range, indexed by
//!   the alloc index handed back from [`FragmentFile::find_space`]. Freed
//!   rows are zeroed; the row count shrinks only past trailing zeroed rows.
//! - `fragments`: `(offset, length)` for every reclaimed range, kept packed
//!   at the front of the file.
//!
//! Live allocations and fragments together tile `[0, file_size)` exactly.
//! [`FragmentFile::check_tiling`] verifies this.
//!
//! The counters (`alloc_count`, `fragment_count`, `file_size`, ...) are not
//! stored in these files; the owner persists them and passes them back in
//! on reopen.

use crate::layout::{ColumnKind, RecordLayout, Scalar};
use crate::paths::FragmentPaths;
use crate::structfile::{
    open_shared, read_at, write_at, SharedFile, StructuredFile, StructuredFileOptions,
};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, trace};
use worlddb_core::{Error, Oid, Result};

/// Allocator bookkeeping persisted by the owner of a FragmentFile
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FragmentCounters {
    /// Cap on `alloc_count + fragment_count`
    pub max_allocs: u32,
    /// Length of the longest fragment (0 when there are none)
    pub longest_fragment: i64,
    /// Number of packed fragment rows
    pub fragment_count: u32,
    /// Number of allocation rows in use (zeroed rows included)
    pub alloc_count: u32,
    /// End of the allocated byte space
    pub file_size: i64,
}

impl FragmentCounters {
    /// Counters for a brand-new, empty FragmentFile
    pub fn new(max_allocs: u32) -> Self {
        FragmentCounters {
            max_allocs,
            longest_fragment: 0,
            fragment_count: 0,
            alloc_count: 0,
            file_size: 0,
        }
    }
}

/// A range handed out by [`FragmentFile::find_space`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Grant {
    /// Byte offset of the range
    pub offset: i64,
    /// Bytes granted; may exceed the request when a whole fragment is reused
    pub length: i64,
    /// Row in the allocations file
    pub index: u32,
}

fn fragments_layout() -> Result<RecordLayout> {
    RecordLayout::of(&[(ColumnKind::Int64, "offset"), (ColumnKind::Int64, "length")])
}

fn allocations_layout() -> Result<RecordLayout> {
    RecordLayout::of(&[
        (ColumnKind::Int32, "oid"),
        (ColumnKind::Int64, "offset"),
        (ColumnKind::Int64, "length"),
    ])
}

fn long(value: Scalar) -> Result<i64> {
    value
        .as_i64()
        .ok_or_else(|| Error::corruption(format!("expected integer column, found {}", value)))
}

/// One allocator instance: a data file plus its bookkeeping files
#[derive(Debug)]
pub struct FragmentFile {
    id: String,
    data: SharedFile,
    fragments: StructuredFile,
    allocs: StructuredFile,
    counters: FragmentCounters,
}

impl FragmentFile {
    /// Open (or create) the files of FragmentFile `id` under `dir`
    pub fn open(dir: &Path, id: &str, counters: FragmentCounters) -> Result<Self> {
        let paths = FragmentPaths::new(dir, id);
        std::fs::create_dir_all(paths.dir())?;
        let data = open_shared(&paths.data)?;
        let fragments = StructuredFile::open(&paths.fragments, fragments_layout()?)?;
        let allocs = StructuredFile::open_with(
            &paths.allocations,
            Arc::new(allocations_layout()?),
            StructuredFileOptions::default()
                .max_len(counters.max_allocs as u64)
                .ignore_schema(),
        )?;
        debug!(
            target: "worlddb::alloc",
            id,
            allocs = counters.alloc_count,
            fragments = counters.fragment_count,
            file_size = counters.file_size,
            "Opened fragment file"
        );
        Ok(FragmentFile {
            id: id.to_string(),
            data,
            fragments,
            allocs,
            counters,
        })
    }

    /// Identifier this file was opened under
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Current counters, for the owner to persist
    pub fn counters(&self) -> FragmentCounters {
        self.counters
    }

    /// Whether another entry can be tracked
    pub fn has_room(&self) -> bool {
        self.counters.alloc_count + self.counters.fragment_count < self.counters.max_allocs
    }

    fn fragment(&self, index: u32) -> Result<(i64, i64)> {
        let row = self.fragments.get_all(index as u64)?;
        let mut cols = row.into_iter();
        match (cols.next(), cols.next()) {
            (Some(offset), Some(length)) => Ok((long(offset)?, long(length)?)),
            _ => Err(Error::corruption("short fragment row")),
        }
    }

    fn allocation(&self, index: u32) -> Result<(Oid, i64, i64)> {
        let row = self.allocs.get_all(index as u64)?;
        let mut cols = row.into_iter();
        match (cols.next(), cols.next(), cols.next()) {
            (Some(oid), Some(offset), Some(length)) => {
                Ok((long(oid)? as Oid, long(offset)?, long(length)?))
            }
            _ => Err(Error::corruption("short allocation row")),
        }
    }

    fn set_allocation(&self, index: u32, oid: Oid, offset: i64, length: i64) -> Result<()> {
        self.allocs.set_all(
            index as u64,
            &[
                Scalar::Int(oid as i32),
                Scalar::Long(offset),
                Scalar::Long(length),
            ],
        )
    }

    fn verify_allocation(&self, oid: Oid, offset: i64, length: i64, index: u32) -> Result<()> {
        if index >= self.counters.alloc_count {
            return Err(Error::corruption(format!(
                "fragment file {}: oid {} claims alloc index {} but only {} rows exist",
                self.id, oid, index, self.counters.alloc_count
            )));
        }
        let stored = self.allocation(index)?;
        if stored != (oid, offset, length) {
            return Err(Error::corruption(format!(
                "fragment file {}: alloc {} holds (oid {}, offset {}, length {}), caller reported (oid {}, offset {}, length {})",
                self.id, index, stored.0, stored.1, stored.2, oid, offset, length
            )));
        }
        Ok(())
    }

    /// Remove fragment `index`, shifting later fragments down one slot
    fn pack_fragments(&mut self, index: u32) -> Result<()> {
        let (_, removed) = self.fragment(index)?;
        self.counters.fragment_count -= 1;
        let tail = self.counters.fragment_count - index;
        self.fragments
            .copy_block(index as u64 + 1, index as u64, tail as u64)?;
        if removed >= self.counters.longest_fragment {
            self.recompute_longest()?;
        }
        Ok(())
    }

    fn recompute_longest(&mut self) -> Result<()> {
        let mut longest = 0;
        for i in 0..self.counters.fragment_count {
            longest = longest.max(self.fragment(i)?.1);
        }
        self.counters.longest_fragment = longest;
        Ok(())
    }

    /// Grow the data file to cover `file_size`
    fn extend_data(&self) -> Result<()> {
        let file = self.data.lock();
        if (file.metadata()?.len() as i64) < self.counters.file_size {
            file.set_len(self.counters.file_size as u64)?;
        }
        Ok(())
    }

    /// Allocate `size` bytes for `oid`.
    ///
    /// Reuses the first fragment at least `size` long (consuming all of it),
    /// otherwise carves space at the end of the file. Returns `None` when the
    /// entry cap is reached.
    pub fn find_space(&mut self, oid: Oid, size: i64) -> Result<Option<Grant>> {
        if size <= 0 {
            return Err(Error::invalid_operation(format!(
                "cannot allocate {} bytes",
                size
            )));
        }
        if !self.has_room() {
            return Ok(None);
        }
        let index = self.counters.alloc_count;

        if size <= self.counters.longest_fragment {
            for x in 0..self.counters.fragment_count {
                let (offset, length) = self.fragment(x)?;
                if length >= size {
                    self.set_allocation(index, oid, offset, length)?;
                    self.counters.alloc_count += 1;
                    self.pack_fragments(x)?;
                    trace!(
                        target: "worlddb::alloc",
                        id = %self.id, oid, offset, length, "Reused fragment"
                    );
                    return Ok(Some(Grant {
                        offset,
                        length,
                        index,
                    }));
                }
            }
        }

        let offset = self.counters.file_size;
        self.set_allocation(index, oid, offset, size)?;
        self.counters.alloc_count += 1;
        self.counters.file_size += size;
        self.extend_data()?;
        trace!(
            target: "worlddb::alloc",
            id = %self.id, oid, offset, length = size, "Extended file"
        );
        Ok(Some(Grant {
            offset,
            length: size,
            index,
        }))
    }

    /// Grow an allocation in place.
    ///
    /// Succeeds when the range ends at end-of-file or an adjacent fragment
    /// is long enough to absorb; returns the new length. No bytes move.
    pub fn reallocate_space(
        &mut self,
        oid: Oid,
        begin: i64,
        old_size: i64,
        new_size: i64,
        index: u32,
    ) -> Result<Option<i64>> {
        if new_size <= old_size {
            return Err(Error::invalid_operation(format!(
                "reallocation must grow: {} -> {}",
                old_size, new_size
            )));
        }
        self.verify_allocation(oid, begin, old_size, index)?;
        let old_end = begin + old_size;

        if old_end == self.counters.file_size {
            self.set_allocation(index, oid, begin, new_size)?;
            self.counters.file_size += new_size - old_size;
            self.extend_data()?;
            return Ok(Some(new_size));
        }

        for x in 0..self.counters.fragment_count {
            let (offset, length) = self.fragment(x)?;
            if offset == old_end {
                let merged = old_size + length;
                if merged >= new_size {
                    self.set_allocation(index, oid, begin, merged)?;
                    self.pack_fragments(x)?;
                    return Ok(Some(merged));
                }
                break;
            }
        }
        Ok(None)
    }

    /// Release an allocation, turning it into a fragment.
    ///
    /// The triple must match the stored row exactly.
    pub fn free(&mut self, oid: Oid, offset: i64, size: i64, index: u32) -> Result<()> {
        self.verify_allocation(oid, offset, size, index)?;
        self.set_allocation(index, 0, 0, 0)?;
        // Trailing zeroed rows are released; interior ones stay reserved
        while self.counters.alloc_count > 0
            && self.allocation(self.counters.alloc_count - 1)?.2 == 0
        {
            self.counters.alloc_count -= 1;
        }
        self.fragments.set_all(
            self.counters.fragment_count as u64,
            &[Scalar::Long(offset), Scalar::Long(size)],
        )?;
        self.counters.fragment_count += 1;
        self.counters.longest_fragment = self.counters.longest_fragment.max(size);
        trace!(
            target: "worlddb::alloc",
            id = %self.id, oid, offset, length = size, "Freed allocation"
        );
        Ok(())
    }

    /// Live allocations as `(oid, offset, length)`, zeroed rows skipped
    pub fn allocations(&self) -> Result<Vec<(Oid, i64, i64)>> {
        let mut live = Vec::new();
        for i in 0..self.counters.alloc_count {
            let row = self.allocation(i)?;
            if row.2 > 0 {
                live.push(row);
            }
        }
        Ok(live)
    }

    /// Fragments as `(offset, length)`
    pub fn fragment_ranges(&self) -> Result<Vec<(i64, i64)>> {
        (0..self.counters.fragment_count)
            .map(|i| self.fragment(i))
            .collect()
    }

    /// Verify that allocations and fragments tile `[0, file_size)` with no
    /// overlap and no gap.
    pub fn check_tiling(&self) -> Result<()> {
        let mut ranges: Vec<(i64, i64)> = self
            .allocations()?
            .into_iter()
            .map(|(_, offset, length)| (offset, length))
            .collect();
        ranges.extend(self.fragment_ranges()?);
        ranges.sort_unstable();

        let mut cursor = 0i64;
        for (offset, length) in ranges {
            if offset < cursor {
                return Err(Error::corruption(format!(
                    "fragment file {}: range at {} overlaps bytes before {}",
                    self.id, offset, cursor
                )));
            }
            if offset > cursor {
                return Err(Error::corruption(format!(
                    "fragment file {}: bytes {}..{} are untracked",
                    self.id, cursor, offset
                )));
            }
            cursor = offset + length;
        }
        if cursor != self.counters.file_size {
            return Err(Error::corruption(format!(
                "fragment file {}: ranges end at {} but file size is {}",
                self.id, cursor, self.counters.file_size
            )));
        }
        Ok(())
    }

    /// Read `len` bytes at `offset` of the data file
    pub fn read_bytes(&self, offset: i64, len: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; len];
        read_at(&mut self.data.lock(), offset as u64, &mut buf)?;
        Ok(buf)
    }

    /// Write `bytes` at `offset` of the data file
    pub fn write_bytes(&self, offset: i64, bytes: &[u8]) -> Result<()> {
        write_at(&mut self.data.lock(), offset as u64, bytes)
    }

    /// The data file handle, for record views over allocated ranges
    pub fn data_file(&self) -> SharedFile {
        Arc::clone(&self.data)
    }

    /// Flush and fsync all three files
    pub fn sync(&self) -> Result<()> {
        self.data.lock().sync_all()?;
        self.fragments.sync()?;
        self.allocs.sync()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn fresh(dir: &TempDir, max: u32) -> FragmentFile {
        FragmentFile::open(dir.path(), "1", FragmentCounters::new(max)).unwrap()
    }

    #[test]
    fn test_extends_at_end() {
        let dir = TempDir::new().unwrap();
        let mut ff = fresh(&dir, 10);
        let a = ff.find_space(5, 100).unwrap().unwrap();
        let b = ff.find_space(6, 50).unwrap().unwrap();
        assert_eq!(a, Grant { offset: 0, length: 100, index: 0 });
        assert_eq!(b, Grant { offset: 100, length: 50, index: 1 });
        assert_eq!(ff.counters().file_size, 150);
        ff.check_tiling().unwrap();
    }

    #[test]
    fn test_reuses_whole_fragment() {
        let dir = TempDir::new().unwrap();
        let mut ff = fresh(&dir, 10);
        let a = ff.find_space(5, 100).unwrap().unwrap();
        ff.find_space(6, 50).unwrap().unwrap();
        ff.free(5, a.offset, a.length, a.index).unwrap();
        assert_eq!(ff.counters().longest_fragment, 100);

        let c = ff.find_space(7, 30).unwrap().unwrap();
        assert_eq!(c.offset, 0);
        assert_eq!(c.length, 100);
        assert_eq!(ff.counters().fragment_count, 0);
        assert_eq!(ff.counters().longest_fragment, 0);
        ff.check_tiling().unwrap();
    }

    #[test]
    fn test_free_mismatch_is_corruption() {
        let dir = TempDir::new().unwrap();
        let mut ff = fresh(&dir, 10);
        let a = ff.find_space(5, 100).unwrap().unwrap();
        let err = ff.free(5, a.offset, a.length + 1, a.index).unwrap_err();
        assert!(matches!(err, Error::Corruption(_)));
        let err = ff.free(9, a.offset, a.length, a.index).unwrap_err();
        assert!(matches!(err, Error::Corruption(_)));
        // nothing changed
        assert_eq!(ff.allocations().unwrap(), vec![(5, 0, 100)]);
    }

    #[test]
    fn test_cap_rejects() {
        let dir = TempDir::new().unwrap();
        let mut ff = fresh(&dir, 2);
        assert!(ff.find_space(1, 10).unwrap().is_some());
        assert!(ff.find_space(2, 10).unwrap().is_some());
        assert!(ff.find_space(3, 10).unwrap().is_none());
    }

    #[test]
    fn test_reallocate_at_end_of_file() {
        let dir = TempDir::new().unwrap();
        let mut ff = fresh(&dir, 10);
        ff.find_space(1, 10).unwrap().unwrap();
        let b = ff.find_space(2, 10).unwrap().unwrap();
        let grown = ff.reallocate_space(2, b.offset, b.length, 25, b.index).unwrap();
        assert_eq!(grown, Some(25));
        assert_eq!(ff.counters().file_size, 35);
        ff.check_tiling().unwrap();
    }

    #[test]
    fn test_reallocate_merges_adjacent_fragment() {
        let dir = TempDir::new().unwrap();
        let mut ff = fresh(&dir, 10);
        let a = ff.find_space(1, 10).unwrap().unwrap();
        let b = ff.find_space(2, 20).unwrap().unwrap();
        ff.find_space(3, 10).unwrap().unwrap();
        ff.free(2, b.offset, b.length, b.index).unwrap();

        let grown = ff.reallocate_space(1, a.offset, a.length, 15, a.index).unwrap();
        assert_eq!(grown, Some(30));
        assert_eq!(ff.counters().fragment_count, 0);
        ff.check_tiling().unwrap();
    }

    #[test]
    fn test_reallocate_blocked() {
        let dir = TempDir::new().unwrap();
        let mut ff = fresh(&dir, 10);
        let a = ff.find_space(1, 10).unwrap().unwrap();
        ff.find_space(2, 10).unwrap().unwrap();
        assert_eq!(
            ff.reallocate_space(1, a.offset, a.length, 11, a.index).unwrap(),
            None
        );
    }

    #[test]
    fn test_data_round_trip() {
        let dir = TempDir::new().unwrap();
        let mut ff = fresh(&dir, 10);
        let a = ff.find_space(1, 16).unwrap().unwrap();
        ff.write_bytes(a.offset, b"hello fragments").unwrap();
        assert_eq!(ff.read_bytes(a.offset, 15).unwrap(), b"hello fragments");
    }

    #[test]
    fn test_reopen_with_counters() {
        let dir = TempDir::new().unwrap();
        let counters = {
            let mut ff = fresh(&dir, 10);
            let a = ff.find_space(1, 16).unwrap().unwrap();
            ff.write_bytes(a.offset, b"persisted").unwrap();
            ff.find_space(2, 8).unwrap().unwrap();
            ff.counters()
        };
        let ff = FragmentFile::open(dir.path(), "1", counters).unwrap();
        assert_eq!(ff.allocations().unwrap(), vec![(1, 0, 16), (2, 16, 8)]);
        assert_eq!(ff.read_bytes(0, 9).unwrap(), b"persisted");
        ff.check_tiling().unwrap();
    }
}
