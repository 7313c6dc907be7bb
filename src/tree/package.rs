//! The decoded package: everything the archive materializes.

use std::collections::HashMap;

use crate::pool::{EntryRef, Pool};
use crate::tree::class::{Class, InnerClass};
use crate::tree::file::File;

#[derive(Default, Debug)]
pub struct Package {
	pub pool: Pool,
	pub classes: Vec<Class>,
	pub files: Vec<File>,
	/// The package-global inner-class table, in archive order.
	pub all_inner_classes: Vec<InnerClass>,
	ic_index: HashMap<EntryRef, usize>,
	pub default_class_version: (u16, u16),
	pub default_modtime: i32,
	/// Options ORed onto every file, from `AO_DEFLATE_HINT`.
	pub default_file_options: u32,
}

impl Package {
	pub fn new() -> Package {
		Package::default()
	}

	pub fn set_all_inner_classes(&mut self, ics: Vec<InnerClass>) {
		self.ic_index = ics
			.iter()
			.enumerate()
			.map(|(i, ic)| (ic.this_class, i))
			.collect();
		self.all_inner_classes = ics;
	}

	pub fn global_inner_class(&self, this_class: EntryRef) -> Option<&InnerClass> {
		self.ic_index.get(&this_class).map(|&i| &self.all_inner_classes[i])
	}
}
