//! Resource files carried by the archive.

use crate::pool::{EntryRef, Pool};

#[derive(Debug)]
pub struct File {
	pub name: EntryRef,
	pub modtime: i32,
	pub options: u32,
	pub bytes: Vec<u8>,
}

impl File {
	/// A class stub is a zero-length `.class` entry whose body will be
	/// generated from the corresponding class.
	pub fn is_class_stub(&self, pool: &Pool) -> bool {
		self.bytes.is_empty()
			&& pool
				.utf8_text(self.name)
				.map(|n| n.as_bytes().ends_with(b".class"))
				.unwrap_or(false)
	}
}
