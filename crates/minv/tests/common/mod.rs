//! Shared test utilities for minv integration tests.
//!
//! - `TestHarness` with temporary data, config and lock directories
//! - `FakeHarvesterFactory` serving canned listings from memory
//! - `RecordingNotifier` counting schedule reload notifications

pub mod fakes;
pub mod harness;

pub use fakes::{FakeHarvesterFactory, RecordingNotifier};
pub use harness::{index_name, TestHarness, MISSION, FILE_TYPE};
