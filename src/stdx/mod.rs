//! Small, self-contained data structures used across the daemon.
//!
//! # Scope
//! `stdx` hosts narrow, allocation-light utilities that back the status
//! pipeline. They are tuned for predictable memory use and fast paths
//! rather than general-purpose ergonomics.
//!
//! # Design themes
//! - Offset-based references instead of borrowed slices in hot paths.
//! - Deterministic reset behavior for reuse across requests.
//!
//! # Module map
//! - `arena`: append-only byte arena with `u32`-offset references.
//! - `dir_list`: packed single-pass directory listing (`getdents64` on
//!   Linux, `read_dir` elsewhere).

pub mod arena;
pub mod dir_list;

pub use arena::{ByteArena, ByteRef};
pub use dir_list::{entry_kind, list_dir, FileKind};
