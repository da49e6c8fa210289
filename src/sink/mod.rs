//! The `sink` module models the distributed filesystem as an external
//! collaborator with a single write contract, `copy_from_local`.
//!
//! [`MountedSink`] writes through a mounted view of the filesystem (an NFS
//! gateway or FUSE mount). The remote directory must already exist.

pub mod mounted;

pub use mounted::{MountedSink, RemoteSink, SinkError, timestamped_remote_path};

#[cfg(test)]
mod tests;
