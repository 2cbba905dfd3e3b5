//! # Pulse Filesystem Storage
//!
//! Persists each job as an indented JSON document `<root>/<id>.json`.
//!
//! Writes go to a `.json.tmp` sibling that is renamed over the target, and
//! every read or write of a path happens under that path's lock from a
//! [`PathLocks`] registry, so readers in this process never observe a
//! partially written document.

mod locks;
mod storage;

pub use locks::PathLocks;
pub use storage::FileSystemStorage;
