//! Byte-range allocation on top of FragmentFiles
//!
//! Each FragmentFile is a `worlddb.FragmentFile` object whose row carries the
//! allocator counters; its files are named after its OID. Anything that owns
//! a range (blobs, lists, dictionaries) is a `worlddb.Allocation` whose row
//! records which FragmentFile holds the range and where.
//!
//! Moving a range always reads the old bytes, writes them to the new range,
//! records the new range in the owner's row and only then frees the old one.

use super::Database;
use crate::value::Object;
use std::sync::Arc;
use tracing::{debug, info};
use worlddb_core::{Error, Oid, Result, Uid};
use worlddb_storage::paths::FragmentPaths;
use worlddb_storage::{
    FragmentCounters, FragmentFile, Grant, RecordLayout, Scalar, StructuredFile,
    StructuredFileOptions,
};

/// Where an allocation-owning object's bytes live
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Allocation {
    /// The owning object
    pub owner: Uid,
    /// The FragmentFile holding the range
    pub fragfile: Uid,
    /// Byte offset of the range in the FragmentFile's data file
    pub begin: i64,
    /// Bytes reserved
    pub length: i64,
    /// Row in the FragmentFile's allocations file
    pub index: u32,
    /// Bytes in use, never more than `length`
    pub content: i64,
}

impl Allocation {
    fn placed(owner: Uid, fragfile: Uid, grant: Grant, content: i64) -> Self {
        Allocation {
            owner,
            fragfile,
            begin: grant.offset,
            length: grant.length,
            index: grant.index,
            content,
        }
    }
}

impl Database {
    // ========================================================================
    // FragmentFiles
    // ========================================================================

    /// Every FragmentFile object, oldest first
    pub(crate) fn fragment_files(&self) -> Result<Vec<Uid>> {
        let table = self.table_for(&self.system().fragment_file)?;
        table.scan()
    }

    /// Run `f` against an open FragmentFile, persisting its counters after.
    ///
    /// The file is opened lazily from the counters stored in its row.
    pub(crate) fn with_fragment_file<T>(
        &self,
        ff: Uid,
        f: impl FnOnce(&mut FragmentFile) -> Result<T>,
    ) -> Result<T> {
        let mut heap = self.heap.lock();
        if !heap.contains_key(&ff.oid) {
            let counters = self.load_counters(ff)?;
            let file = FragmentFile::open(&self.dir, &ff.oid.to_string(), counters)?;
            heap.insert(ff.oid, file);
        }
        let file = heap
            .get_mut(&ff.oid)
            .ok_or_else(|| Error::corruption(format!("fragment file {} vanished", ff)))?;
        let before = file.counters();
        let result = f(file);
        let after = file.counters();
        if before != after {
            self.store_counters(ff, after)?;
        }
        result
    }

    fn load_counters(&self, ff: Uid) -> Result<FragmentCounters> {
        let int = |field: &str| -> Result<u32> {
            let v = self.read_long(ff, field)?;
            u32::try_from(v).map_err(|_| {
                Error::corruption(format!("fragment file {}: {} is {}", ff, field, v))
            })
        };
        Ok(FragmentCounters {
            max_allocs: int("maxAllocs")?,
            longest_fragment: self.read_long(ff, "longestFragment")?,
            fragment_count: int("fragmentCount")?,
            alloc_count: int("allocCount")?,
            file_size: self.read_long(ff, "fileSize")?,
        })
    }

    fn store_counters(&self, ff: Uid, counters: FragmentCounters) -> Result<()> {
        self.write_raw(ff, "maxAllocs", &[Scalar::Int(counters.max_allocs as i32)])?;
        self.write_raw(ff, "longestFragment", &[Scalar::Long(counters.longest_fragment)])?;
        self.write_raw(ff, "fragmentCount", &[Scalar::Int(counters.fragment_count as i32)])?;
        self.write_raw(ff, "allocCount", &[Scalar::Int(counters.alloc_count as i32)])?;
        self.write_raw(ff, "fileSize", &[Scalar::Long(counters.file_size)])
    }

    fn create_fragment_file(&self) -> Result<Uid> {
        let counters = FragmentCounters::new(self.config.max_allocs);
        let obj = Object::new(&self.system().fragment_file)
            .with("maxAllocs", counters.max_allocs as i64)?
            .with("longestFragment", counters.longest_fragment)?
            .with("fragmentCount", counters.fragment_count as i64)?
            .with("allocCount", counters.alloc_count as i64)?
            .with("fileSize", counters.file_size)?;
        let uid = self.insert_object(&obj, false)?;
        info!(
            target: "worlddb::alloc",
            fragfile = uid.oid,
            max_allocs = counters.max_allocs,
            "Created fragment file"
        );
        Ok(uid)
    }

    /// Find `size` bytes for `owner` in any FragmentFile but `skip`,
    /// starting a new FragmentFile when all of them are full
    fn place(&self, owner: Uid, size: i64, skip: Option<Uid>) -> Result<(Uid, Grant)> {
        for ff in self.fragment_files()? {
            if Some(ff) == skip {
                continue;
            }
            if let Some(grant) = self.with_fragment_file(ff, |file| file.find_space(owner.oid, size))? {
                return Ok((ff, grant));
            }
        }
        let ff = self.create_fragment_file()?;
        match self.with_fragment_file(ff, |file| file.find_space(owner.oid, size))? {
            Some(grant) => Ok((ff, grant)),
            None => Err(Error::corruption(format!(
                "new fragment file {} refused {} bytes",
                ff, size
            ))),
        }
    }

    // ========================================================================
    // Allocations
    // ========================================================================

    /// Reserve `size` bytes for `owner` and record the range in its row
    pub(crate) fn allocate(&self, owner: Uid, size: i64) -> Result<Allocation> {
        let (ff, grant) = self.place(owner, size, None)?;
        let alloc = Allocation::placed(owner, ff, grant, 0);
        self.store_allocation(&alloc)?;
        debug!(
            target: "worlddb::alloc",
            owner = owner.oid,
            fragfile = ff.oid,
            begin = alloc.begin,
            length = alloc.length,
            "Allocated"
        );
        Ok(alloc)
    }

    /// Range currently recorded in `owner`'s row
    pub(crate) fn load_allocation(&self, owner: Uid) -> Result<Allocation> {
        let ff = self.read_raw(owner, "fragfile")?;
        let fragfile = match ff.as_slice() {
            [Scalar::Int(oid), Scalar::Int(genhash)] if *oid > 0 => Uid::new(*oid as Oid, *genhash),
            _ => {
                return Err(Error::corruption(format!(
                    "{} has no fragment file recorded",
                    owner
                )))
            }
        };
        let index = self.read_long(owner, "allocIndex")?;
        Ok(Allocation {
            owner,
            fragfile,
            begin: self.read_long(owner, "allocBegin")?,
            length: self.read_long(owner, "allocLength")?,
            index: u32::try_from(index)
                .map_err(|_| Error::corruption(format!("{}: allocIndex is {}", owner, index)))?,
            content: self.read_long(owner, "contentLength")?,
        })
    }

    /// Record `alloc` in its owner's row
    pub(crate) fn store_allocation(&self, alloc: &Allocation) -> Result<()> {
        if alloc.content > alloc.length {
            return Err(Error::invalid_operation(format!(
                "{}: content {} exceeds allocation {}",
                alloc.owner, alloc.content, alloc.length
            )));
        }
        let owner = alloc.owner;
        self.write_raw(
            owner,
            "fragfile",
            &[
                Scalar::Int(alloc.fragfile.oid as i32),
                Scalar::Int(alloc.fragfile.genhash),
            ],
        )?;
        self.write_raw(owner, "allocBegin", &[Scalar::Long(alloc.begin)])?;
        self.write_raw(owner, "allocLength", &[Scalar::Long(alloc.length)])?;
        self.write_raw(owner, "allocIndex", &[Scalar::Int(alloc.index as i32)])?;
        self.write_raw(owner, "contentLength", &[Scalar::Long(alloc.content)])
    }

    /// A new range of `size` bytes for the same owner, in the same
    /// FragmentFile when it has room. Nothing is copied or freed.
    pub(crate) fn relocate(&self, alloc: &Allocation, size: i64) -> Result<Allocation> {
        let owner = alloc.owner;
        let local = self.with_fragment_file(alloc.fragfile, |file| file.find_space(owner.oid, size))?;
        let (ff, grant) = match local {
            Some(grant) => (alloc.fragfile, grant),
            None => self.place(owner, size, Some(alloc.fragfile))?,
        };
        Ok(Allocation::placed(owner, ff, grant, alloc.content))
    }

    /// Give a range back to its FragmentFile
    pub(crate) fn release(&self, alloc: &Allocation) -> Result<()> {
        self.with_fragment_file(alloc.fragfile, |file| {
            file.free(alloc.owner.oid, alloc.begin, alloc.length, alloc.index)
        })?;
        debug!(
            target: "worlddb::alloc",
            owner = alloc.owner.oid,
            fragfile = alloc.fragfile.oid,
            begin = alloc.begin,
            length = alloc.length,
            "Released"
        );
        Ok(())
    }

    /// Grow `alloc` by at least `extra` bytes, keeping its content.
    ///
    /// Grows in place when the bytes after the range are free, otherwise
    /// moves the content to a new range.
    pub(crate) fn expand(&self, alloc: &mut Allocation, extra: i64) -> Result<()> {
        let size = alloc.length + extra;
        let (owner, begin, length, index) = (alloc.owner.oid, alloc.begin, alloc.length, alloc.index);
        let grown = self.with_fragment_file(alloc.fragfile, |file| {
            file.reallocate_space(owner, begin, length, size, index)
        })?;
        if let Some(length) = grown {
            alloc.length = length;
            self.store_allocation(alloc)?;
            debug!(target: "worlddb::alloc", owner, length, "Grew in place");
            return Ok(());
        }

        let old = *alloc;
        let moved = self.relocate(&old, size)?;
        let bytes = self.read_region(&old, 0, old.content as usize)?;
        self.write_region(&moved, 0, &bytes)?;
        *alloc = moved;
        self.store_allocation(alloc)?;
        self.release(&old)?;
        debug!(
            target: "worlddb::alloc",
            owner,
            from = old.fragfile.oid,
            to = moved.fragfile.oid,
            length = moved.length,
            "Moved allocation"
        );
        Ok(())
    }

    /// Release `alloc`'s range and clear it in the owner's row
    pub(crate) fn free_allocation(&self, alloc: &mut Allocation) -> Result<()> {
        self.release(alloc)?;
        alloc.begin = 0;
        alloc.length = 0;
        alloc.index = 0;
        alloc.content = 0;
        self.store_allocation(alloc)
    }

    fn read_region(&self, alloc: &Allocation, at: i64, len: usize) -> Result<Vec<u8>> {
        self.with_fragment_file(alloc.fragfile, |file| file.read_bytes(alloc.begin + at, len))
    }

    fn write_region(&self, alloc: &Allocation, at: i64, bytes: &[u8]) -> Result<()> {
        if at + bytes.len() as i64 > alloc.length {
            return Err(Error::Bounds {
                index: (at + bytes.len() as i64) as u64,
                max: alloc.length as u64,
            });
        }
        self.with_fragment_file(alloc.fragfile, |file| file.write_bytes(alloc.begin + at, bytes))
    }

    /// Fixed-width rows over an allocation's range
    pub(crate) fn region_view(&self, alloc: &Allocation, layout: Arc<RecordLayout>) -> Result<StructuredFile> {
        let data = self.with_fragment_file(alloc.fragfile, |file| Ok(file.data_file()))?;
        let path = FragmentPaths::new(&self.dir, &alloc.fragfile.oid.to_string()).data;
        StructuredFile::over(
            data,
            &path,
            layout,
            StructuredFileOptions::default()
                .offset(alloc.begin as u64)
                .max_size(alloc.length as u64)
                .ignore_schema(),
        )
    }

    // ========================================================================
    // Blobs
    // ========================================================================

    /// Store `bytes` out of line, returning the blob's identity
    pub fn store_blob(&self, bytes: &[u8]) -> Result<Uid> {
        let blob = Object::new(&self.system().blob);
        let uid = self.insert_object(&blob, false)?;
        let mut alloc = self.allocate(uid, bytes.len().max(1) as i64)?;
        self.write_region(&alloc, 0, bytes)?;
        alloc.content = bytes.len() as i64;
        self.store_allocation(&alloc)?;
        Ok(uid)
    }

    /// Give back the range of a blob nothing refers to any more. The blob
    /// object itself stays and reads as empty.
    pub(crate) fn free_blob(&self, uid: Uid) -> Result<()> {
        let mut alloc = self.load_allocation(uid)?;
        if alloc.length == 0 {
            return Ok(());
        }
        self.free_allocation(&mut alloc)
    }

    /// Bytes of a stored blob
    pub fn load_blob(&self, uid: Uid) -> Result<Vec<u8>> {
        let entry = self.entry(uid)?;
        let class = self.table_by_id(entry.class_id)?.class().clone();
        if !class.is_a(super::BLOB_CLASS) {
            return Err(Error::invalid_operation(format!(
                "{} is a {}, not a blob",
                uid,
                class.name()
            )));
        }
        let alloc = self.load_allocation(uid)?;
        self.read_region(&alloc, 0, alloc.content as usize)
    }
}
