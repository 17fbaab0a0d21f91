//! Local-to-remote file sync
//!
//! Filters a local tree, streams it as a tar archive through a bounded
//! bridge, and unpacks it inside a workload via remote exec.

pub mod archive;
pub mod bridge;
pub mod file_sync;
pub mod filter;
pub mod request;

pub use archive::{ArchiveBuilder, ArchiveEntry, ArchiveRoot, ArchiveStats, EntryKind};
pub use bridge::{BridgeReader, BridgeWriter};
pub use file_sync::{unpack_command, FileSync};
pub use filter::{is_excluded, PathFilter};
pub use request::SyncRequest;
