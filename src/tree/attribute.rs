//! A decoded attribute: classfile-format content bytes plus the fixups
//! that still need local pool indexes patched in.

use crate::fixups::Fixups;
use crate::layout::LayoutHandle;
use crate::pool::EntryRef;

#[derive(Debug, Clone)]
pub struct Attribute {
	pub layout: LayoutHandle,
	/// The attribute's name, as a pool Utf8 entry.
	pub name: EntryRef,
	pub bytes: Vec<u8>,
	pub fixups: Fixups,
}

impl Attribute {
	/// The canonical content-free instance of a layout; stands alone for
	/// empty layouts like `Deprecated`, gets replaced once bands are read
	/// for everything else.
	pub fn canonical(layout: LayoutHandle, name: EntryRef) -> Attribute {
		Attribute { layout, name, bytes: Vec::new(), fixups: Fixups::new() }
	}
}
