//! Deferred constant-pool patches.
//!
//! Bytecode and attribute bytes are emitted with zero placeholders where a
//! pool index belongs; each placeholder is recorded as a fixup. Once the
//! class's local pool is known, a writer runs the fixups to patch real
//! indexes in.

use crate::pool::EntryRef;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefWidth {
	U1,
	U2,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fixup {
	pub offset: u32,
	pub width: RefWidth,
	pub entry: EntryRef,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Fixups {
	fixups: Vec<Fixup>,
}

impl Fixups {
	pub fn new() -> Fixups {
		Fixups::default()
	}

	pub fn add_u1(&mut self, offset: usize, entry: EntryRef) {
		self.fixups.push(Fixup { offset: offset as u32, width: RefWidth::U1, entry });
	}

	pub fn add_u2(&mut self, offset: usize, entry: EntryRef) {
		self.fixups.push(Fixup { offset: offset as u32, width: RefWidth::U2, entry });
	}

	pub fn is_empty(&self) -> bool {
		self.fixups.is_empty()
	}

	pub fn len(&self) -> usize {
		self.fixups.len()
	}

	pub fn iter(&self) -> impl Iterator<Item = &Fixup> {
		self.fixups.iter()
	}

	pub fn entries(&self) -> impl Iterator<Item = EntryRef> + '_ {
		self.fixups.iter().map(|f| f.entry)
	}

	pub fn clear(&mut self) {
		self.fixups.clear();
	}

	pub fn take(&mut self) -> Fixups {
		std::mem::take(self)
	}
}
