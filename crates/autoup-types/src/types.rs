//! Core data types for autoup
//!
//! Status enums shared by the snapshot tree, the differ, the uploader and the persisted snapshot
//! format, plus the statistics an upload batch reports.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Status code of an entry that matches the remote side
pub const STATUS_SAME: u8 = 0;
/// Status code of a changed entry (`Modify` for directories, `Update` for files)
pub const STATUS_CHANGED: u8 = 1;
/// Status code of an entry that has never been uploaded
pub const STATUS_ADD: u8 = 2;
/// Status code of an entry that disappeared from disk
pub const STATUS_DELETE: u8 = 3;
/// Status code of an entry removed remotely and waiting for eviction
pub const STATUS_SHIFT_DELETE: u8 = 4;

/// Synchronization status of a tracked directory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum DirStatus {
    /// Remote copy matches the local directory
    #[default]
    Same,
    /// The directory's own files changed, or some descendant did
    Modify,
    /// Discovered locally, not yet created remotely
    Add,
    /// Vanished from disk, still present remotely
    Delete,
    /// Removed remotely; evicted by the next cleanup pass
    ShiftDelete,
}

impl DirStatus {
    /// Integer code used by the snapshot format and the status dump
    pub fn code(self) -> u8 {
        match self {
            Self::Same => STATUS_SAME,
            Self::Modify => STATUS_CHANGED,
            Self::Add => STATUS_ADD,
            Self::Delete => STATUS_DELETE,
            Self::ShiftDelete => STATUS_SHIFT_DELETE,
        }
    }

    /// Decode an integer status code
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            STATUS_SAME => Some(Self::Same),
            STATUS_CHANGED => Some(Self::Modify),
            STATUS_ADD => Some(Self::Add),
            STATUS_DELETE => Some(Self::Delete),
            STATUS_SHIFT_DELETE => Some(Self::ShiftDelete),
            _ => None,
        }
    }

    /// Whether this status may appear in a persisted snapshot
    pub fn is_persistable(self) -> bool {
        self != Self::ShiftDelete
    }

    /// Whether work remains for this directory
    pub fn is_pending(self) -> bool {
        self != Self::Same
    }
}

/// Synchronization status of a tracked file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum FileStatus {
    /// Remote copy matches the local file
    #[default]
    Same,
    /// Modification time moved forward since the last upload
    Update,
    /// Discovered locally, not yet uploaded
    Add,
    /// Vanished from disk, still present remotely
    Delete,
    /// Removed remotely; evicted by the next cleanup pass
    ShiftDelete,
}

impl FileStatus {
    /// Integer code used by the snapshot format and the status dump
    pub fn code(self) -> u8 {
        match self {
            Self::Same => STATUS_SAME,
            Self::Update => STATUS_CHANGED,
            Self::Add => STATUS_ADD,
            Self::Delete => STATUS_DELETE,
            Self::ShiftDelete => STATUS_SHIFT_DELETE,
        }
    }

    /// Decode an integer status code
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            STATUS_SAME => Some(Self::Same),
            STATUS_CHANGED => Some(Self::Update),
            STATUS_ADD => Some(Self::Add),
            STATUS_DELETE => Some(Self::Delete),
            STATUS_SHIFT_DELETE => Some(Self::ShiftDelete),
            _ => None,
        }
    }

    /// Whether this status may appear in a persisted snapshot
    pub fn is_persistable(self) -> bool {
        self != Self::ShiftDelete
    }

    /// Whether the file content must be transferred
    pub fn needs_transfer(self) -> bool {
        matches!(self, Self::Add | Self::Update)
    }
}

/// Statistics of one upload batch
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct UploadStats {
    /// Number of remote directories created
    pub directories_created: u64,
    /// Number of files transferred
    pub files_uploaded: u64,
    /// Number of remote files removed
    pub files_removed: u64,
    /// Number of remote directory trees removed
    pub directories_removed: u64,
    /// Wall-clock time of the batch
    pub duration: Duration,
}

impl UploadStats {
    /// Create a new empty statistics instance
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of remote operations performed
    pub fn operations(&self) -> u64 {
        self.directories_created + self.files_uploaded + self.files_removed + self.directories_removed
    }

    /// Merge statistics from another instance
    pub fn merge(&mut self, other: &UploadStats) {
        self.directories_created += other.directories_created;
        self.files_uploaded += other.files_uploaded;
        self.files_removed += other.files_removed;
        self.directories_removed += other.directories_removed;
        self.duration += other.duration;
    }
}
