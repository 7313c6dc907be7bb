//! Bytecode instruction formats.
//!
//! A table of per-opcode formats (length, constant pool index position,
//! expected pool tag, branch offset position, local slot position,
//! inline constant position), in normal and `wide` variants, drives all
//! width and position decisions in O(1).

use std::sync::OnceLock;

use anyhow::{bail, Result};

use crate::constants::{opcode, pseudo_op, Tag};
use crate::error::UnpackError;

const W: usize = 2; // normal / wide

pub struct Formats {
	length: [[i8; 256]; W],
	index: [[u8; 256]; W],
	tag: [[Option<Tag>; 256]; W],
	branch: [[u8; 256]; W],
	slot: [[u8; 256]; W],
	con: [[u8; 256]; W],
}

/// One `def` call covers a contiguous opcode range with a format string:
/// `b` opcode byte, `k` pool index (next char names the tag), `o` branch
/// offset, `l` local slot, `x` inline constant, `w` starts the wide form.
fn def(f: &mut Formats, fmt: &str, from: u8, to: u8) {
	let (normal, wide) = match fmt.find('w') {
		Some(i) => (&fmt[..i], Some(&fmt[i..])),
		None => (fmt, None),
	};
	for (w, fmt) in [(0, Some(normal)), (1, wide)] {
		let Some(fmt) = fmt else { continue };
		let length = fmt.len() as i8;
		let index = fmt.find('k').unwrap_or(0);
		let branch = fmt.find('o').unwrap_or(0);
		let slot = fmt.find('l').unwrap_or(0);
		let con = fmt.find('x').unwrap_or(0);
		let tag = if index > 0 {
			match fmt.as_bytes().get(index + 1) {
				Some(b'c') => Some(Tag::Class),
				Some(b'k') => Some(Tag::LoadableValue),
				Some(b'f') => Some(Tag::Fieldref),
				Some(b'm') => Some(Tag::Methodref),
				Some(b'i') => Some(Tag::InterfaceMethodref),
				Some(b'y') => Some(Tag::InvokeDynamic),
				// the bare `bk` form of _ldc
				_ => Some(Tag::LoadableValue),
			}
		} else {
			None
		};
		for bc in from..=to {
			let bc = bc as usize;
			debug_assert_eq!(f.length[w][bc], -1);
			f.length[w][bc] = length;
			f.index[w][bc] = index as u8;
			f.tag[w][bc] = tag;
			f.branch[w][bc] = branch as u8;
			f.slot[w][bc] = slot as u8;
			f.con[w][bc] = con as u8;
		}
	}
}

fn build() -> Formats {
	let mut f = Formats {
		length: [[-1; 256]; W],
		index: [[0; 256]; W],
		tag: [[None; 256]; W],
		branch: [[0; 256]; W],
		slot: [[0; 256]; W],
		con: [[0; 256]; W],
	};
	def(&mut f, "b", opcode::NOP, opcode::DCONST_1);
	def(&mut f, "bx", opcode::BIPUSH, opcode::BIPUSH);
	def(&mut f, "bxx", opcode::SIPUSH, opcode::SIPUSH);
	def(&mut f, "bk", opcode::LDC, opcode::LDC);
	def(&mut f, "bkk", opcode::LDC_W, opcode::LDC2_W);
	def(&mut f, "blwbll", opcode::ILOAD, opcode::ALOAD);
	def(&mut f, "b", opcode::ILOAD_0, opcode::SALOAD);
	def(&mut f, "blwbll", opcode::ISTORE, opcode::ASTORE);
	def(&mut f, "b", opcode::ISTORE_0, opcode::LXOR);
	def(&mut f, "blxwbllxx", opcode::IINC, opcode::IINC);
	def(&mut f, "b", opcode::I2L, opcode::DCMPG);
	def(&mut f, "boo", opcode::IFEQ, opcode::JSR);
	def(&mut f, "blwbll", opcode::RET, opcode::RET);
	// switches have no fixed format; lengths stay -1
	def(&mut f, "b", opcode::IRETURN, opcode::RETURN);
	def(&mut f, "bkf", opcode::GETSTATIC, opcode::PUTFIELD);
	def(&mut f, "bkm", opcode::INVOKEVIRTUAL, opcode::INVOKESTATIC);
	def(&mut f, "bkixx", opcode::INVOKEINTERFACE, opcode::INVOKEINTERFACE);
	def(&mut f, "bkyxx", opcode::INVOKEDYNAMIC, opcode::INVOKEDYNAMIC);
	def(&mut f, "bkc", opcode::NEW, opcode::NEW);
	def(&mut f, "bx", opcode::NEWARRAY, opcode::NEWARRAY);
	def(&mut f, "bkc", opcode::ANEWARRAY, opcode::ANEWARRAY);
	def(&mut f, "b", opcode::ARRAYLENGTH, opcode::ATHROW);
	def(&mut f, "bkc", opcode::CHECKCAST, opcode::INSTANCEOF);
	def(&mut f, "b", opcode::MONITORENTER, opcode::MONITOREXIT);
	def(&mut f, "bkcx", opcode::MULTIANEWARRAY, opcode::MULTIANEWARRAY);
	def(&mut f, "boo", opcode::IFNULL, opcode::IFNONNULL);
	def(&mut f, "boooo", opcode::GOTO_W, opcode::JSR_W);
	// every known opcode tolerates a spurious wide prefix
	for bc in 0..256 {
		if f.length[0][bc] >= 0 && f.length[1][bc] == -1 {
			f.length[1][bc] = 1 + f.length[0][bc];
		}
	}
	f
}

fn formats() -> &'static Formats {
	static FORMATS: OnceLock<Formats> = OnceLock::new();
	FORMATS.get_or_init(build)
}

/// Length in bytes of a fixed-length opcode.
pub fn op_length(bc: u8) -> Result<usize> {
	match formats().length[0][bc as usize] {
		-1 => bail!(UnpackError::IllegalOpcode { opcode: bc as u16 }),
		l => Ok(l as usize),
	}
}

pub fn op_wide_length(bc: u8) -> Result<usize> {
	match formats().length[1][bc as usize] {
		-1 => bail!(UnpackError::IllegalOpcode { opcode: bc as u16 }),
		l => Ok(l as usize),
	}
}

pub fn is_local_slot_op(bc: u8) -> bool {
	formats().slot[0][bc as usize] > 0
}

pub fn is_branch_op(bc: u8) -> bool {
	formats().branch[0][bc as usize] > 0
}

pub fn is_field_op(bc: u8) -> bool {
	(opcode::GETSTATIC..=opcode::PUTFIELD).contains(&bc)
}

pub fn is_invoke_init_op(bc: u16) -> bool {
	(pseudo_op::INVOKEINIT_OP..pseudo_op::INVOKEINIT_LIMIT).contains(&bc)
}

pub fn is_self_linker_op(bc: u16) -> bool {
	(pseudo_op::SELF_LINKER_OP..pseudo_op::SELF_LINKER_LIMIT).contains(&bc)
}

pub fn is_cp_ref_op(bc: u16) -> bool {
	if bc < 256 && formats().index[0][bc as usize] > 0 {
		return true;
	}
	if (pseudo_op::XLDC_OP..pseudo_op::XLDC_LIMIT).contains(&bc) {
		return true;
	}
	bc == pseudo_op::INVOKESPECIAL_INT || bc == pseudo_op::INVOKESTATIC_INT
}

/// The pool tag an opcode's operand must carry.
pub fn cp_ref_op_tag(bc: u16) -> Option<Tag> {
	if bc < 256 {
		if let Some(tag) = formats().tag[0][bc as usize] {
			return Some(tag);
		}
	}
	if (pseudo_op::XLDC_OP..pseudo_op::XLDC_LIMIT).contains(&bc) {
		return Some(Tag::LoadableValue);
	}
	if bc == pseudo_op::INVOKESPECIAL_INT || bc == pseudo_op::INVOKESTATIC_INT {
		return Some(Tag::InterfaceMethodref);
	}
	None
}

/// Byte pokes used while expanding instruction payloads.

pub fn set_short(buf: &mut [u8], pc: usize, x: i32) {
	buf[pc] = (x >> 8) as u8;
	buf[pc + 1] = x as u8;
}

pub fn set_int(buf: &mut [u8], pc: usize, x: i32) {
	set_short(buf, pc, x >> 16);
	set_short(buf, pc + 2, x);
}

pub fn get_short(buf: &[u8], pc: usize) -> i32 {
	((buf[pc] as i32) << 8) | buf[pc + 1] as i32
}

pub fn get_int(buf: &[u8], pc: usize) -> i32 {
	(get_short(buf, pc) << 16) | get_short(buf, pc + 2)
}

/// First 4-byte-aligned offset at or past `pc`.
pub fn align_pc(pc: usize) -> usize {
	(pc + 3) & !3
}

/// Byte length of a whole tableswitch instruction at `pc`.
pub fn tableswitch_length(pc: usize, case_count: usize) -> usize {
	(align_pc(pc + 1) - pc) + (3 + case_count) * 4
}

/// Byte length of a whole lookupswitch instruction at `pc`.
pub fn lookupswitch_length(pc: usize, case_count: usize) -> usize {
	(align_pc(pc + 1) - pc) + (2 + 2 * case_count) * 4
}

/// The pc just past the instruction at `pc`, switches and wide prefixes
/// included; used to check the expansion and by tests.
pub fn next_pc(bytes: &[u8], pc: usize) -> Result<usize> {
	let bc = bytes[pc];
	match bc {
		opcode::WIDE => {
			let target = bytes[pc + 1];
			Ok(pc + op_wide_length(target)?)
		}
		opcode::TABLESWITCH => {
			let apc = align_pc(pc + 1);
			let lo = get_int(bytes, apc + 4);
			let hi = get_int(bytes, apc + 8);
			Ok(pc + tableswitch_length(pc, (hi - lo + 1) as usize))
		}
		opcode::LOOKUPSWITCH => {
			let apc = align_pc(pc + 1);
			let n = get_int(bytes, apc + 4);
			Ok(pc + lookupswitch_length(pc, n as usize))
		}
		_ => Ok(pc + op_length(bc)?),
	}
}

#[cfg(test)]
mod testing {
	use pretty_assertions::assert_eq;
	use super::*;

	#[test]
	fn lengths_of_common_opcodes() -> Result<()> {
		assert_eq!(op_length(opcode::NOP)?, 1);
		assert_eq!(op_length(opcode::BIPUSH)?, 2);
		assert_eq!(op_length(opcode::SIPUSH)?, 3);
		assert_eq!(op_length(opcode::LDC)?, 2);
		assert_eq!(op_length(opcode::LDC_W)?, 3);
		assert_eq!(op_length(opcode::IINC)?, 3);
		assert_eq!(op_wide_length(opcode::IINC)?, 6);
		assert_eq!(op_length(opcode::GOTO_W)?, 5);
		assert_eq!(op_length(opcode::INVOKEINTERFACE)?, 5);
		assert_eq!(op_length(opcode::INVOKEDYNAMIC)?, 5);
		assert_eq!(op_wide_length(opcode::ILOAD)?, 4);
		Ok(())
	}

	#[test]
	fn switches_have_no_fixed_length() {
		assert!(op_length(opcode::TABLESWITCH).is_err());
		assert!(op_length(opcode::LOOKUPSWITCH).is_err());
		assert!(op_length(opcode::WIDE).is_err());
	}

	#[test]
	fn classification() {
		assert!(is_branch_op(opcode::IFEQ));
		assert!(is_branch_op(opcode::GOTO_W));
		assert!(!is_branch_op(opcode::RETURN));
		assert!(is_local_slot_op(opcode::ILOAD));
		assert!(is_local_slot_op(opcode::RET));
		assert!(is_local_slot_op(opcode::IINC));
		assert!(!is_local_slot_op(opcode::ILOAD_0));
		assert!(is_cp_ref_op(opcode::GETFIELD as u16));
		assert!(is_cp_ref_op(pseudo_op::QLDC));
		assert!(!is_cp_ref_op(opcode::NOP as u16));
	}

	#[test]
	fn expected_tags() {
		assert_eq!(cp_ref_op_tag(opcode::NEW as u16), Some(Tag::Class));
		assert_eq!(cp_ref_op_tag(opcode::GETSTATIC as u16), Some(Tag::Fieldref));
		assert_eq!(cp_ref_op_tag(opcode::INVOKEINTERFACE as u16), Some(Tag::InterfaceMethodref));
		assert_eq!(cp_ref_op_tag(opcode::LDC as u16), Some(Tag::LoadableValue));
		assert_eq!(cp_ref_op_tag(pseudo_op::INVOKESTATIC_INT), Some(Tag::InterfaceMethodref));
	}

	#[test]
	fn switch_lengths_align_payloads() {
		// at pc 0 the payload starts at 4
		assert_eq!(tableswitch_length(0, 1), 4 + 16);
		assert_eq!(lookupswitch_length(3, 2), 1 + 4 * (2 + 4));
	}
}
