//! The `source` module enumerates the files a run publishes.
//!
//! A [`SourceDir`] is a snapshot of a directory listing. Its
//! [`stream`](SourceDir::stream) reads file contents lazily, one item per
//! regular file, always in the same (file name) order, and can be restarted by
//! calling it again. An unreadable directory is a setup error; an unreadable
//! file only produces a [`ReadFailure`] item.

pub mod enumerator;

pub use enumerator::{ReadFailure, SourceDir, SourceError, SourceFile};
