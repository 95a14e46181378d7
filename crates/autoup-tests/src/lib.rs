//! autoup integration test suite
//!
//! Cross-crate scenarios live in `tests/`; this library only carries the helpers they share.

#![warn(missing_docs)]
#![warn(clippy::all)]

/// Shared fixtures and filesystem helpers
pub mod test_utils;
