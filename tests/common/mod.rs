//! Shared test utilities for the integration suites.
//!
//! Import via `mod common;` from a suite's main.rs.

#![allow(dead_code)]

use std::sync::{Arc, Once};
use tempfile::TempDir;
pub use worlddb::{Class, Database, Error, FieldType, Object, Query, Value, WorldConfig};

static INIT_TRACING: Once = Once::new();

/// Route `tracing` output through the test harness when `RUST_LOG` is set.
pub fn init_tracing() {
    INIT_TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

// ============================================================================
// TestDb
// ============================================================================

/// A database in a temporary directory that can be closed and reopened.
pub struct TestDb {
    pub db: Option<Database>,
    pub dir: TempDir,
    config: WorldConfig,
}

impl TestDb {
    pub fn new() -> Self {
        Self::with_config(WorldConfig::default())
    }

    pub fn with_config(config: WorldConfig) -> Self {
        init_tracing();
        let dir = TempDir::new().expect("tempdir");
        let db = Database::open_with_config(dir.path(), config.clone()).expect("open");
        TestDb {
            db: Some(db),
            dir,
            config,
        }
    }

    pub fn db(&self) -> &Database {
        self.db.as_ref().expect("database is open")
    }

    /// Close and reopen the directory. Classes must be registered again.
    pub fn reopen(&mut self) -> &Database {
        if let Some(db) = self.db.take() {
            db.close().expect("close");
        }
        self.db = Some(Database::open_with_config(self.dir.path(), self.config.clone()).expect("reopen"));
        self.db()
    }
}

// ============================================================================
// Classes
// ============================================================================

/// `int`, `float` and an unconstrained reference
pub fn simple_class() -> Arc<Class> {
    Class::builder("itest.Simple")
        .field("count", FieldType::Int)
        .field("ratio", FieldType::Float)
        .field("other", FieldType::reference())
        .build()
        .expect("class")
}

/// A node that points at another node
pub fn node_class() -> Arc<Class> {
    Class::builder("itest.Node")
        .field("name", FieldType::string())
        .field("next", FieldType::reference())
        .build()
        .expect("class")
}

/// A document with a 128-byte inline string
pub fn document_class() -> Arc<Class> {
    Class::builder("itest.Document")
        .field("body", FieldType::FixedString(128))
        .build()
        .expect("class")
}

/// A bag of containers
pub fn inventory_class() -> Arc<Class> {
    Class::builder("itest.Inventory")
        .field("items", FieldType::list_of(FieldType::reference()))
        .field("counts", FieldType::dict_of(FieldType::string(), FieldType::Int))
        .field("tags", FieldType::list_of(FieldType::string()))
        .build()
        .expect("class")
}
