//! Property-based test suite entry point.

mod header_tests;
mod refcount_tests;
