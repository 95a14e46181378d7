//! Result type alias for autoup operations

use crate::Error;

/// Result type alias for autoup operations
pub type Result<T> = std::result::Result<T, Error>;
