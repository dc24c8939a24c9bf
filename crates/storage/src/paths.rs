//! Database directory layout
//!
//! ```text
//! <dir>/
//!   .lock                 exclusive open lock
//!   worlddb.toml          configuration
//!   classes               class registry (StructuredFile)
//!   objects               OID table (StructuredFile)
//!   <class name>.data     one Table per registered class
//!   fragments/
//!     <id>.data           allocator byte space
//!     <id>.fragments      reclaimed ranges
//!     <id>.allocations    live ranges
//! ```

use std::path::{Path, PathBuf};

/// Class registry file name
pub const CLASSES_FILE: &str = "classes";

/// OID table file name
pub const OBJECTS_FILE: &str = "objects";

/// Lock file name
pub const LOCK_FILE: &str = ".lock";

/// Subdirectory holding every FragmentFile
pub const FRAGMENTS_DIR: &str = "fragments";

/// Path of the Table file for a class
pub fn class_data_path(dir: &Path, class_name: &str) -> PathBuf {
    dir.join(format!("{}.data", class_name))
}

/// The three files backing one FragmentFile
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FragmentPaths {
    /// Raw allocator bytes
    pub data: PathBuf,
    /// Reclaimed ranges
    pub fragments: PathBuf,
    /// Live ranges
    pub allocations: PathBuf,
}

impl FragmentPaths {
    /// Paths for FragmentFile `id` in database directory `dir`
    pub fn new(dir: &Path, id: &str) -> Self {
        let base = dir.join(FRAGMENTS_DIR);
        FragmentPaths {
            data: base.join(format!("{}.data", id)),
            fragments: base.join(format!("{}.fragments", id)),
            allocations: base.join(format!("{}.allocations", id)),
        }
    }

    /// Directory containing the files
    pub fn dir(&self) -> &Path {
        self.data.parent().unwrap_or_else(|| Path::new("."))
    }
}
