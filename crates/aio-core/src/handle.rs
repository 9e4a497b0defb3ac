//! Native file handle.
//!
//! An opaque platform token identifying an open file. The engine never
//! closes it (spec.md §3) — ownership stays with the caller.

use std::os::unix::io::RawFd;

pub type NativeFileHandle = RawFd;
