//! Shared storage integration tests.
//!
//! Tests the KeyValueStore interface against all implementations.
//! Each implementation module imports these test functions and runs them.

pub mod kv_store_tests;
