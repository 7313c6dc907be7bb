//! The `bc_bands` group: a band-sizing scan over the opcode stream, then
//! the expansion of every method body into standard bytecode.

use std::collections::HashMap;
use std::io::Read;

use anyhow::{anyhow, bail, Result};

use crate::constants::opcode as op;
use crate::constants::pseudo_op as ps;
use crate::constants::{archive_version, Ctx, Tag};
use crate::error::UnpackError;
use crate::fixups::Fixups;
use crate::instruction;
use crate::limit::ByteSource;
use crate::pool::{Entry, EntryRef};
use crate::reader::attrs::HolderId;
use crate::reader::{ArchiveReader, Bands};
use crate::band::RefBand;

/// The operand band a self-linker opcode draws from, and what it links.
struct SelfLinker {
	orig_bc: u8,
	is_super: bool,
	is_aload: bool,
	is_field: bool,
}

fn decode_self_linker(bc: u16) -> SelfLinker {
	let mut idx = bc - ps::SELF_LINKER_OP;
	let is_super = idx >= ps::SELF_LINKER_SUPER_FLAG;
	if is_super {
		idx -= ps::SELF_LINKER_SUPER_FLAG;
	}
	let is_aload = idx >= ps::SELF_LINKER_ALOAD_FLAG;
	if is_aload {
		idx -= ps::SELF_LINKER_ALOAD_FLAG;
	}
	let orig_bc = (ps::FIRST_LINKER_OP + idx) as u8;
	SelfLinker { orig_bc, is_super, is_aload, is_field: instruction::is_field_op(orig_bc) }
}

fn self_op_ref_band(bands: &mut Bands, bc: u16) -> &mut RefBand {
	let l = decode_self_linker(bc);
	match (l.is_super, l.is_field) {
		(false, true) => &mut bands.bc_thisfield,
		(false, false) => &mut bands.bc_thismethod,
		(true, true) => &mut bands.bc_superfield,
		(true, false) => &mut bands.bc_supermethod,
	}
}

/// The operand band of a constant-pool-carrying opcode.
fn cp_ref_op_band(bands: &mut Bands, bc: u16) -> Result<&mut RefBand> {
	let band = match instruction::cp_ref_op_tag(bc) {
		Some(Tag::Class) => &mut bands.bc_classref,
		Some(Tag::Fieldref) => &mut bands.bc_fieldref,
		Some(Tag::Methodref) => &mut bands.bc_methodref,
		Some(Tag::InterfaceMethodref) => &mut bands.bc_imethodref,
		Some(Tag::InvokeDynamic) => &mut bands.bc_indyref,
		Some(Tag::LoadableValue) => match bc {
			ps::ILDC | ps::ILDC_W => &mut bands.bc_intref,
			ps::FLDC | ps::FLDC_W => &mut bands.bc_floatref,
			ps::LLDC2_W => &mut bands.bc_longref,
			ps::DLDC2_W => &mut bands.bc_doubleref,
			ps::SLDC | ps::SLDC_W => &mut bands.bc_stringref,
			ps::CLDC | ps::CLDC_W => &mut bands.bc_classref,
			ps::QLDC | ps::QLDC_W => &mut bands.bc_loadablevalueref,
			_ => bail!(UnpackError::IllegalOpcode { opcode: bc }),
		},
		_ => bail!(UnpackError::IllegalOpcode { opcode: bc }),
	};
	Ok(band)
}

impl<R: Read> ArchiveReader<R> {
	pub(crate) fn read_byte_codes(&mut self) -> Result<()> {
		let op_bytes = self.read_byte_code_ops()?;

		// All the operand bands have now been sized. Read them in turn.
		macro_rules! read_operands {
			($($band:ident),* $(,)?) => {
				$(self.bands.$band.read_from(&mut self.input, &mut self.headers)?;)*
			};
		}
		read_operands!(
			bc_case_value,
			bc_byte,
			bc_short,
			bc_local,
			bc_label,
			bc_intref,
			bc_floatref,
			bc_longref,
			bc_doubleref,
			bc_stringref,
			bc_loadablevalueref,
			bc_classref,
			bc_fieldref,
			bc_methodref,
			bc_imethodref,
			bc_indyref,
			bc_thisfield,
			bc_superfield,
			bc_thismethod,
			bc_supermethod,
			bc_initref,
			bc_escref,
			bc_escrefsize,
			bc_escsize,
		);
		self.bands.bc_escbyte.expect_length(self.bands.bc_escsize.len_total()?);
		self.bands.bc_escbyte.read_from(&mut self.input, &mut self.headers)?;

		self.expand_byte_code_ops(&op_bytes)?;

		// Done fetching values from the operand bands.
		self.bands.bc_case_count.done_disbursing()?;
		macro_rules! done_operands {
			($($band:ident),* $(,)?) => {
				$(self.bands.$band.done_disbursing()?;)*
			};
		}
		done_operands!(
			bc_case_value,
			bc_byte,
			bc_short,
			bc_local,
			bc_label,
			bc_intref,
			bc_floatref,
			bc_longref,
			bc_doubleref,
			bc_stringref,
			bc_loadablevalueref,
			bc_classref,
			bc_fieldref,
			bc_methodref,
			bc_imethodref,
			bc_indyref,
			bc_thisfield,
			bc_superfield,
			bc_thismethod,
			bc_supermethod,
			bc_initref,
			bc_escref,
			bc_escrefsize,
			bc_escsize,
			bc_escbyte,
		);

		// Code attributes waited for the instruction boundary model.
		let holders: Vec<HolderId> =
			self.codes_with_flags.iter().map(|&k| HolderId::Code(k)).collect();
		self.read_attrs(Ctx::Code, &holders)?;
		// Ditto for the exception handler offsets.
		self.fixup_code_handlers()
	}

	/// First pass: walk the opcode stream, announcing one more value on
	/// each operand band an opcode consumes. Switches are queued and
	/// sized from `bc_case_count` afterwards.
	fn read_byte_code_ops(&mut self) -> Result<Vec<Vec<u8>>> {
		let mut all_switch_ops: Vec<u16> = Vec::new();
		let mut op_bytes = Vec::with_capacity(self.codes.len());
		for _ in 0..self.codes.len() {
			let mut ops: Vec<u8> = Vec::new();
			loop {
				let mut bc = self.input.read_byte()? as u16;
				ops.push(bc as u8);
				let mut is_wide = false;
				if bc == op::WIDE as u16 {
					bc = self.input.read_byte()? as u16;
					ops.push(bc as u8);
					is_wide = true;
				}
				match bc {
					b if b == op::TABLESWITCH as u16 || b == op::LOOKUPSWITCH as u16 => {
						self.bands.bc_case_count.expect_more_length(1);
						all_switch_ops.push(bc);
					}
					b if b == op::IINC as u16 => {
						self.bands.bc_local.expect_more_length(1);
						if is_wide {
							self.bands.bc_short.expect_more_length(1);
						} else {
							self.bands.bc_byte.expect_more_length(1);
						}
					}
					b if b == op::SIPUSH as u16 => self.bands.bc_short.expect_more_length(1),
					b if b == op::BIPUSH as u16 || b == op::NEWARRAY as u16 => {
						self.bands.bc_byte.expect_more_length(1)
					}
					b if b == op::MULTIANEWARRAY as u16 => {
						self.bands.bc_classref.expect_more_length(1);
						self.bands.bc_byte.expect_more_length(1);
					}
					ps::REF_ESCAPE => {
						self.bands.bc_escrefsize.expect_more_length(1);
						self.bands.bc_escref.expect_more_length(1);
					}
					ps::BYTE_ESCAPE => {
						self.bands.bc_escsize.expect_more_length(1);
						// bc_escbyte is counted once all sizes are known
					}
					ps::END_MARKER => {
						ops.pop();
						break;
					}
					_ if instruction::is_invoke_init_op(bc) => {
						self.bands.bc_initref.expect_more_length(1);
					}
					_ if instruction::is_self_linker_op(bc) => {
						self_op_ref_band(&mut self.bands, bc).expect_more_length(1);
					}
					b if b < 256 && instruction::is_branch_op(b as u8) => {
						self.bands.bc_label.expect_more_length(1);
					}
					_ if instruction::is_cp_ref_op(bc) => {
						cp_ref_op_band(&mut self.bands, bc)?.expect_more_length(1);
					}
					b if b < 256 && instruction::is_local_slot_op(b as u8) => {
						self.bands.bc_local.expect_more_length(1);
					}
					b if b >= ps::BYTECODE_LIMIT => {
						bail!(UnpackError::IllegalOpcode { opcode: bc });
					}
					_ => {}
				}
			}
			op_bytes.push(ops);
		}

		// Switch case counts feed the label and case-value band sizes.
		self.bands.bc_case_count.expect_length(all_switch_ops.len());
		self.bands.bc_case_count.read_from(&mut self.input, &mut self.headers)?;
		for &bc in &all_switch_ops {
			let case_count = self.bands.bc_case_count.get_len()?;
			self.bands.bc_label.expect_more_length(1 + case_count); // default + cases
			self.bands.bc_case_value.expect_more_length(if bc == op::TABLESWITCH as u16 {
				1
			} else {
				case_count
			});
		}
		self.bands.bc_case_count.reset_for_second_pass();
		Ok(op_bytes)
	}

	/// Second pass: reinterpret each opcode into standard JVM encoding,
	/// building the bytes, the instruction map, the fixup list and the
	/// label worklist.
	fn expand_byte_code_ops(&mut self, op_bytes: &[Vec<u8>]) -> Result<()> {
		let mut member_cache: HashMap<(Tag, EntryRef), Vec<EntryRef>> = HashMap::new();
		for k in 0..self.codes.len() {
			let (c, _) = self.codes[k];
			let this_class = self.pkg.classes[c].this_class;
			let super_class = self.pkg.classes[c].super_class;
			let mut new_class: Option<EntryRef> = None;

			let mut buf: Vec<u8> = Vec::new();
			let mut insn_map: Vec<u32> = Vec::new();
			let mut labels: Vec<usize> = Vec::new();
			let mut fixups = Fixups::new();
			self.ldc_refs.entry(c).or_default();

			let ops = &op_bytes[k];
			let mut i = 0;
			while i < ops.len() {
				let mut bc = ops[i] as u16;
				i += 1;
				let cur_pc = buf.len();
				insn_map.push(cur_pc as u32);
				let mut is_wide = false;
				if bc == op::WIDE as u16 {
					buf.push(op::WIDE);
					bc = ops[i] as u16;
					i += 1;
					is_wide = true;
				}

				if bc == op::TABLESWITCH as u16 || bc == op::LOOKUPSWITCH as u16 {
					let case_count = self.bands.bc_case_count.get_len()?;
					let total = if bc == op::TABLESWITCH as u16 {
						instruction::tableswitch_length(cur_pc, case_count)
					} else {
						instruction::lookupswitch_length(cur_pc, case_count)
					};
					buf.push(bc as u8);
					buf.resize(cur_pc + total, 0);
					let apc = instruction::align_pc(cur_pc + 1);
					if bc == op::TABLESWITCH as u16 {
						let lo = self.bands.bc_case_value.get_int()?;
						instruction::set_int(&mut buf, apc + 4, lo);
						instruction::set_int(&mut buf, apc + 8, lo + case_count as i32 - 1);
					} else {
						instruction::set_int(&mut buf, apc + 4, case_count as i32);
						for j in 0..case_count {
							let v = self.bands.bc_case_value.get_int()?;
							instruction::set_int(&mut buf, apc + 8 + 8 * j, v);
						}
					}
					// labels are decoded later, against the finished map
					labels.push(cur_pc);
					continue;
				}

				if bc == op::IINC as u16 {
					buf.push(bc as u8);
					let local = self.bands.bc_local.get_int()?;
					if is_wide {
						let delta = self.bands.bc_short.get_int()?;
						buf.extend_from_slice(&[0; 4]);
						instruction::set_short(&mut buf, cur_pc + 2, local);
						instruction::set_short(&mut buf, cur_pc + 4, delta);
					} else {
						let delta = self.bands.bc_byte.get_byte()?;
						buf.push(local as u8);
						buf.push(delta);
					}
					continue;
				}

				if bc == op::SIPUSH as u16 {
					let val = self.bands.bc_short.get_int()?;
					buf.push(bc as u8);
					buf.extend_from_slice(&[0; 2]);
					instruction::set_short(&mut buf, cur_pc + 1, val);
					continue;
				}

				if bc == op::BIPUSH as u16 || bc == op::NEWARRAY as u16 {
					buf.push(bc as u8);
					buf.push(self.bands.bc_byte.get_byte()?);
					continue;
				}

				if bc == ps::REF_ESCAPE {
					// one insn_map slot covers the whole escape
					let size = self.bands.bc_escrefsize.get_len()?;
					let entry = self.bands.bc_escref.get_ref(&self.pkg.pool)?;
					match size {
						1 => {
							self.ldc_refs.get_mut(&c).expect("created above").insert(entry);
							fixups.add_u1(buf.len(), entry);
						}
						2 => fixups.add_u2(buf.len(), entry),
						_ => bail!("escape reference of size {}", size),
					}
					buf.extend(std::iter::repeat(0).take(size));
					continue;
				}

				if bc == ps::BYTE_ESCAPE {
					let size = self.bands.bc_escsize.get_len()?;
					for _ in 0..size {
						buf.push(self.bands.bc_escbyte.get_byte()?);
					}
					continue;
				}

				if instruction::is_invoke_init_op(bc) {
					let class_ref = match bc - ps::INVOKEINIT_OP {
						ps::INVOKEINIT_SELF_OPTION => this_class,
						ps::INVOKEINIT_SUPER_OPTION => super_class
							.ok_or_else(|| anyhow!("<init> call against a class with no super"))?,
						_ => new_class
							.ok_or_else(|| anyhow!("<init> call with no preceding new"))?,
					};
					buf.push(op::INVOKESPECIAL);
					let ordinal = self.bands.bc_initref.get_len()?;
					let entry = self.pkg.pool.overloading_for_index(
						Tag::Methodref,
						class_ref,
						"<init>",
						ordinal,
					)?;
					fixups.add_u2(buf.len(), entry);
					buf.extend_from_slice(&[0; 2]);
					continue;
				}

				if instruction::is_self_linker_op(bc) {
					let linker = decode_self_linker(bc);
					let which_cls = if linker.is_super {
						super_class.ok_or_else(|| {
							anyhow!("self-linker op against a class with no super")
						})?
					} else {
						this_class
					};
					let member_tag =
						if linker.is_field { Tag::Fieldref } else { Tag::Methodref };
					let index = member_cache
						.entry((member_tag, which_cls))
						.or_insert_with(|| self.pkg.pool.member_index(member_tag, which_cls));
					let entry = self_op_ref_band(&mut self.bands, bc).get_ref_using(index)?;
					if linker.is_aload {
						buf.push(op::ALOAD_0);
						// the aload_0 keeps its own instruction boundary
						insn_map.push(buf.len() as u32);
					}
					buf.push(linker.orig_bc);
					fixups.add_u2(buf.len(), entry);
					buf.extend_from_slice(&[0; 2]);
					continue;
				}

				if bc < 256 && instruction::is_branch_op(bc as u8) {
					buf.push(bc as u8);
					debug_assert!(!is_wide); // no wide prefix for branches
					let next_pc = cur_pc + instruction::op_length(bc as u8)?;
					labels.push(cur_pc);
					buf.resize(next_pc, 0);
					continue;
				}

				if instruction::is_cp_ref_op(bc) {
					let entry = cp_ref_op_band(&mut self.bands, bc)?
						.get_ref_opt(&self.pkg.pool)?;
					// a null class reference is shorthand for this class
					let entry = entry.unwrap_or(this_class);
					let mut orig_bc = bc;
					let mut size = 2;
					match bc {
						ps::INVOKESTATIC_INT => orig_bc = op::INVOKESTATIC as u16,
						ps::INVOKESPECIAL_INT => orig_bc = op::INVOKESPECIAL as u16,
						ps::SLDC | ps::ILDC | ps::CLDC | ps::FLDC | ps::QLDC => {
							orig_bc = op::LDC as u16;
							size = 1;
							self.ldc_refs.get_mut(&c).expect("created above").insert(entry);
						}
						ps::SLDC_W | ps::ILDC_W | ps::CLDC_W | ps::FLDC_W | ps::QLDC_W => {
							orig_bc = op::LDC_W as u16;
						}
						ps::LLDC2_W | ps::DLDC2_W => orig_bc = op::LDC2_W as u16,
						b if b == op::NEW as u16 => new_class = Some(entry),
						_ => {}
					}
					if (bc == ps::INVOKESTATIC_INT || bc == ps::INVOKESPECIAL_INT)
						&& self.version < archive_version::JAVA8
					{
						bail!(UnpackError::OpcodeReferenceTagMismatch {
							opcode: orig_bc as u8,
							expected: Tag::Methodref.name(),
							got: Tag::InterfaceMethodref.name(),
						});
					}
					buf.push(orig_bc as u8);
					match size {
						1 => fixups.add_u1(buf.len(), entry),
						_ => fixups.add_u2(buf.len(), entry),
					}
					buf.extend(std::iter::repeat(0).take(size));
					if orig_bc == op::MULTIANEWARRAY as u16 {
						// trailing dimension count
						buf.push(self.bands.bc_byte.get_byte()?);
					} else if orig_bc == op::INVOKEINTERFACE as u16 {
						let Entry::Member { desc, .. } = self.pkg.pool.entry(entry) else {
							bail!("invokeinterface operand is not a member");
						};
						let arg_size = self.pkg.pool.method_arg_slots(*desc)?;
						buf.push(1 + arg_size as u8);
						buf.push(0);
					} else if orig_bc == op::INVOKEDYNAMIC as u16 {
						buf.extend_from_slice(&[0; 2]);
					}
					continue;
				}

				if bc < 256 && instruction::is_local_slot_op(bc as u8) {
					buf.push(bc as u8);
					let local = self.bands.bc_local.get_int()?;
					if is_wide {
						buf.extend_from_slice(&[0; 2]);
						instruction::set_short(&mut buf, cur_pc + 2, local);
					} else {
						buf.push(local as u8);
					}
					continue;
				}

				// a plain one-byte bytecode
				buf.push(bc as u8);
			}

			// fix up labels, now that the code has its instruction map
			let code = self.code_mut(k);
			code.bytes = buf;
			code.insn_map = insn_map;
			code.fixups = fixups;
			for li in 0..labels.len() {
				let pc = labels[li];
				let bc = self.code_mut(k).bytes[pc];
				if bc == op::TABLESWITCH || bc == op::LOOKUPSWITCH {
					let apc = instruction::align_pc(pc + 1);
					let case_count = {
						let bytes = &self.code_mut(k).bytes;
						if bc == op::TABLESWITCH {
							let lo = instruction::get_int(bytes, apc + 4);
							let hi = instruction::get_int(bytes, apc + 8);
							(hi - lo + 1) as usize
						} else {
							instruction::get_int(bytes, apc + 4) as usize
						}
					};
					let target = self.decode_label(k, pc)?;
					instruction::set_int(&mut self.code_mut(k).bytes, apc, target - pc as i32);
					for j in 0..case_count {
						let slot = if bc == op::TABLESWITCH {
							apc + 12 + 4 * j
						} else {
							apc + 12 + 8 * j
						};
						let target = self.decode_label(k, pc)?;
						instruction::set_int(&mut self.code_mut(k).bytes, slot, target - pc as i32);
					}
				} else {
					let target = self.decode_label(k, pc)?;
					let offset = target - pc as i32;
					if instruction::op_length(bc)? == 3 {
						instruction::set_short(&mut self.code_mut(k).bytes, pc + 1, offset);
					} else {
						instruction::set_int(&mut self.code_mut(k).bytes, pc + 1, offset);
					}
				}
			}
		}
		Ok(())
	}

	/// One branch or switch target: the band value is a difference in
	/// renumbered-BCI space, anchored at the carrying instruction.
	fn decode_label(&mut self, k: usize, pc: usize) -> Result<i32> {
		let label = self.bands.bc_label.get_int()?;
		let code = self.code_mut(k);
		let target = code.encode_bci(pc as i32) + label;
		code.decode_bci(target)
	}
}
