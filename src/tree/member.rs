//! Fields, methods and method bodies.

use anyhow::{bail, Result};

use crate::fixups::Fixups;
use crate::pool::EntryRef;
use crate::tree::attribute::Attribute;

#[derive(Debug)]
pub struct Field {
	pub flags: u16,
	pub descriptor: EntryRef,
	pub attributes: Vec<Attribute>,
}

#[derive(Debug)]
pub struct Method {
	pub flags: u16,
	pub descriptor: EntryRef,
	pub attributes: Vec<Attribute>,
	/// Present once the method's empty `Code` attribute has been promoted
	/// to a real code holder.
	pub code: Option<Code>,
}

#[derive(Debug, Clone, Copy)]
pub struct Handler {
	pub class: Option<EntryRef>,
	pub start: i32,
	pub end: i32,
	pub catch: i32,
}

#[derive(Debug, Default)]
pub struct Code {
	pub max_stack: u16,
	/// Local slots beyond those holding the arguments; the writer adds the
	/// argument size back when emitting `max_locals`.
	pub max_na_locals: u16,
	pub handlers: Vec<Handler>,
	/// Expanded standard bytecodes, with zero placeholders under `fixups`.
	pub bytes: Vec<u8>,
	/// `insn_map[i]` is the pc of the i-th instruction.
	pub insn_map: Vec<u32>,
	pub fixups: Fixups,
	pub attributes: Vec<Attribute>,
}

impl Code {
	/// Converts a renumbered bytecode index back to a byte offset:
	/// boundary numbers map through the instruction map, anything past
	/// them is an interior offset biased by the instruction count.
	pub fn decode_bci(&self, bci_code: i32) -> Result<i32> {
		if bci_code < 0 {
			bail!("negative renumbered bytecode index {bci_code}");
		}
		let n = self.insn_map.len() as i32;
		if bci_code < n {
			Ok(self.insn_map[bci_code as usize] as i32)
		} else {
			Ok(bci_code - n)
		}
	}

	/// Inverse of [`Code::decode_bci`].
	pub fn encode_bci(&self, bci: i32) -> i32 {
		match self.insn_map.binary_search(&(bci as u32)) {
			Ok(i) => i as i32,
			Err(_) => self.insn_map.len() as i32 + bci,
		}
	}
}

#[cfg(test)]
mod testing {
	use pretty_assertions::assert_eq;
	use super::*;

	#[test]
	fn bci_renumbering_round_trips() -> Result<()> {
		let code = Code { insn_map: vec![0, 1, 3, 6], ..Code::default() };
		assert_eq!(code.encode_bci(3), 2);
		assert_eq!(code.decode_bci(2)?, 3);
		// an interior offset is biased by the instruction count
		assert_eq!(code.encode_bci(2), 4 + 2);
		assert_eq!(code.decode_bci(4 + 2)?, 2);
		Ok(())
	}
}
