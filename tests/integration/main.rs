//! Integration test suite entry point.

mod concurrency;
mod fixture;
mod paging;
mod recovery;
mod write_modes;
