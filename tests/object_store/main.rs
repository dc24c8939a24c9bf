//! End-to-end tests of the object store through the public `worlddb` API.

#[path = "../common/mod.rs"]
mod common;

mod containers;
mod identity;
mod persistence;
mod schema_guard;
