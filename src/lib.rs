//! A reader for Pack200-style compressed class file archives.
//!
//! The archive decomposes many class files into parallel columns
//! ("bands") sharing common entries, so the decoder is a fixed pipeline:
//! header, constant pool, attribute definitions, inner classes, class
//! bands, bytecodes, files, and a post-pass that rebuilds each class's
//! local constant pool. The result is a fully materialized
//! [`Package`](tree::package::Package), ready for a class-file writer.
//!
//! The surrounding transport is not handled here: callers strip any gzip
//! framing before handing the byte stream in.

pub mod band;
pub mod coding;
pub mod constants;
pub mod error;
pub mod instruction;
pub mod layout;
pub mod limit;
pub mod pool;
pub mod tree;

mod fixups;
mod jstring;
mod reader;

use anyhow::Result;

pub use error::UnpackError;
pub use fixups::{Fixup, Fixups, RefWidth};
pub use reader::read_package;
use tree::package::Package;

/// Reads one archive from an in-memory buffer.
pub fn read_package_bytes(bytes: &[u8]) -> Result<Package> {
	read_package(bytes)
}
