//! Flag decoding, attribute counting, band sizing over layout trees, and
//! the expansion of band values into attribute content.

use std::io::Read;

use anyhow::{anyhow, bail, Context, Result};
use log::trace;

use crate::band::{IntBand, RefBand};
use crate::constants::{Ctx, Tag};
use crate::error::UnpackError;
use crate::layout::{elem_band_coding, AttrLayout, Elem, LayoutHandle, RefTag, Slot};
use crate::pool::Entry;
use crate::reader::ArchiveReader;
use crate::tree::attribute::Attribute;
use crate::tree::class::InnerClass;
use crate::constants::ACC_IC_LONG_FORM;

/// One attribute-layout element band.
pub(crate) enum ElemBand {
	Int(IntBand),
	Ref(RefBand),
}

impl ElemBand {
	fn int(&mut self) -> &mut IntBand {
		match self {
			ElemBand::Int(b) => b,
			ElemBand::Ref(_) => panic!("element band is a reference band"),
		}
	}

	fn reference(&mut self) -> &mut RefBand {
		match self {
			ElemBand::Ref(b) => b,
			ElemBand::Int(_) => panic!("element band is an integer band"),
		}
	}
}

/// Builds the element bands of a layout, in band-index order.
fn make_elem_bands(def: &AttrLayout) -> Vec<ElemBand> {
	fn walk(def: &AttrLayout, elems: &[Elem], out: &mut Vec<(usize, ElemBand)>) {
		for elem in elems {
			let name = |band: usize| format!("({}_{})#{}", def.ctx.name(), def.name, band);
			match elem {
				Elem::Int { band, .. }
				| Elem::Flag { band, .. }
				| Elem::Bci { band, .. }
				| Elem::Bco { band, .. } => {
					out.push((*band, ElemBand::Int(IntBand::new(name(*band), elem_band_coding(elem)))));
				}
				Elem::Ref { band, tag, nullable, .. } => {
					let pool_tag = match tag {
						RefTag::Pool(t) => *t,
						// resolved per holder, at expansion time
						RefTag::FieldSpecific => Tag::String,
					};
					let b = if *nullable {
						RefBand::nullable(name(*band), elem_band_coding(elem), pool_tag)
					} else {
						RefBand::new(name(*band), elem_band_coding(elem), pool_tag)
					};
					out.push((*band, ElemBand::Ref(b)));
				}
				Elem::Repl { band, body, .. } => {
					out.push((*band, ElemBand::Int(IntBand::new(name(*band), elem_band_coding(elem)))));
					walk(def, body, out);
				}
				Elem::Union { band, cases, default_body, .. } => {
					out.push((*band, ElemBand::Int(IntBand::new(name(*band), elem_band_coding(elem)))));
					for case in cases {
						walk(def, &case.body, out);
					}
					walk(def, default_body, out);
				}
				Elem::Call { .. } => {}
			}
		}
	}
	let mut out = Vec::with_capacity(def.band_count);
	if def.has_callables() {
		for c in &def.callables {
			walk(def, &c.body, &mut out);
		}
	} else {
		walk(def, &def.elems, &mut out);
	}
	out.sort_by_key(|(band, _)| *band);
	out.into_iter().map(|(_, b)| b).collect()
}

/// A holder of attributes, identified by its place in the package.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum HolderId {
	Class(usize),
	Field(usize, usize),
	Method(usize, usize),
	/// Index into the reader's code list.
	Code(usize),
}

impl<R: Read> ArchiveReader<R> {
	fn holder_attrs_mut(&mut self, h: HolderId) -> &mut Vec<Attribute> {
		match h {
			HolderId::Class(c) => &mut self.pkg.classes[c].attributes,
			HolderId::Field(c, f) => &mut self.pkg.classes[c].fields[f].attributes,
			HolderId::Method(c, m) => &mut self.pkg.classes[c].methods[m].attributes,
			HolderId::Code(k) => {
				let (c, m) = self.codes[k];
				&mut self.pkg.classes[c].methods[m].code.as_mut().expect("code exists").attributes
			}
		}
	}

	fn holder_set_flags(&mut self, h: HolderId, flags: u16) -> Result<()> {
		match h {
			HolderId::Class(c) => self.pkg.classes[c].flags = flags,
			HolderId::Field(c, f) => self.pkg.classes[c].fields[f].flags = flags,
			HolderId::Method(c, m) => self.pkg.classes[c].methods[m].flags = flags,
			HolderId::Code(_) => {
				if flags != 0 {
					bail!("code pseudo-holders carry no access flags");
				}
			}
		}
		Ok(())
	}

	pub(crate) fn count_and_read_attrs(&mut self, ctx: Ctx, holders: &[HolderId]) -> Result<()> {
		self.count_attrs(ctx, holders)?;
		self.read_attrs(ctx, holders)
	}

	/// Reads the flag words, assigns each holder its list of canonical
	/// attributes, then sizes and fills every element band the claimed
	/// layouts own.
	pub(crate) fn count_attrs(&mut self, ctx: Ctx, holders: &[HolderId]) -> Result<()> {
		let c = ctx as usize;
		let flag_mask = self.attr_defs().flag_mask(ctx);
		let overflow_mask = self.attr_defs().overflow_mask();
		let have_hi = self.have_flags_hi(ctx);
		trace!("scanning flags and attrs for {}[{}]", ctx.name(), holders.len());

		self.bands.attr[c].flags_hi.expect_length(if have_hi { holders.len() } else { 0 });
		self.bands.attr[c].flags_hi.read_from(&mut self.input, &mut self.headers)?;
		self.bands.attr[c].flags_lo.expect_length(holders.len());
		self.bands.attr[c].flags_lo.read_from(&mut self.input, &mut self.headers)?;

		let mut lo_flags = Vec::with_capacity(holders.len());
		let mut overflow_holder_count = 0;
		for _ in holders {
			let flags = self.bands.attr[c].flags_lo.get_int()? as u32;
			if flags as u64 & overflow_mask != 0 {
				overflow_holder_count += 1;
			}
			lo_flags.push(flags);
		}

		// One count per holder with the overflow bit; the indexes follow.
		self.bands.attr[c].attr_count.expect_length(overflow_holder_count);
		self.bands.attr[c].attr_count.read_from(&mut self.input, &mut self.headers)?;
		let total_overflow = self.bands.attr[c].attr_count.len_total()?;
		self.bands.attr[c].attr_indexes.expect_length(total_overflow);
		self.bands.attr[c].attr_indexes.read_from(&mut self.input, &mut self.headers)?;

		let mut total_counts = vec![0usize; self.attr_defs().slot_count(ctx)];
		for (&h, &lo) in holders.iter().zip(&lo_flags) {
			let mut attr_bits = lo as u64 & (flag_mask & 0xffff_ffff);
			let residual = lo - attr_bits as u32;
			if residual > u16::MAX as u32 {
				bail!("residual access flags {:#x} do not fit sixteen bits", residual);
			}
			self.holder_set_flags(h, residual as u16)?;
			if have_hi {
				attr_bits |= (self.bands.attr[c].flags_hi.get_int()? as u32 as u64) << 32;
			}
			if attr_bits == 0 {
				continue;
			}

			let overflow_count = if attr_bits & overflow_mask != 0 {
				attr_bits &= !overflow_mask;
				self.bands.attr[c].attr_count.get_len()?
			} else {
				0
			};

			let mut attrs = Vec::new();
			let mut bits = attr_bits;
			while bits != 0 {
				let ai = bits.trailing_zeros() as usize;
				bits &= bits - 1;
				let Some(def) = self.attr_defs().lookup(ctx, ai) else {
					bail!(UnpackError::BadAttrIndex { index: ai as i32, context: ctx.name() });
				};
				attrs.push(Attribute::canonical(
					LayoutHandle { ctx, slot: Slot::Flag(ai) },
					def.name_ref,
				));
				total_counts[ai] += 1;
			}
			for _ in 0..overflow_count {
				let ai = self.bands.attr[c].attr_indexes.get_len()?;
				let Some(def) = self.attr_defs().lookup(ctx, ai) else {
					bail!(UnpackError::BadAttrIndex { index: ai as i32, context: ctx.name() });
				};
				attrs.push(Attribute::canonical(
					LayoutHandle { ctx, slot: Slot::Flag(ai) },
					def.name_ref,
				));
				total_counts[ai] += 1;
			}
			*self.holder_attrs_mut(h) = attrs;
		}

		self.bands.attr[c].flags_hi.done_disbursing()?;
		self.bands.attr[c].flags_lo.done_disbursing()?;
		self.bands.attr[c].attr_count.done_disbursing()?;
		self.bands.attr[c].attr_indexes.done_disbursing()?;

		// Backward callables of every live layout draw their re-entrant
		// call counts from attr_calls; count them before sizing.
		let mut call_count = 0;
		for predef in [true, false] {
			for ai in 0..total_counts.len() {
				if self.attr_defs().is_predefined(ctx, ai) != predef {
					continue;
				}
				let Some(def) = self.attr_defs().lookup(ctx, ai) else { continue };
				if total_counts[ai] == 0 {
					continue;
				}
				call_count += def.callables.iter().filter(|cb| cb.back).count();
			}
		}
		self.bands.attr[c].attr_calls.expect_length(call_count);
		self.bands.attr[c].attr_calls.read_from(&mut self.input, &mut self.headers)?;

		// Size and fill all the attribute bands, predefined layouts first.
		for predef in [true, false] {
			for ai in 0..total_counts.len() {
				if self.attr_defs().is_predefined(ctx, ai) != predef {
					continue;
				}
				if self.attr_defs().lookup(ctx, ai).is_none() {
					continue;
				}
				let handle = LayoutHandle { ctx, slot: Slot::Flag(ai) };
				let total_count = total_counts[ai];
				if handle == self.attr_defs().inner_classes {
					self.size_local_inner_classes(total_count)?;
					continue;
				}
				if total_count == 0 {
					continue;
				}
				self.read_layout_bands(ctx, handle, total_count)?;
			}
		}
		self.bands.attr[c].attr_calls.done_disbursing()?;
		Ok(())
	}

	/// The `InnerClasses` attribute is sized as if its layout were
	/// `[RCH TI[ (0)[] ()[RCNH RUNH] ]]`: tuples with a zero flag word
	/// copy a global tuple and transmit no outer/name columns.
	fn size_local_inner_classes(&mut self, total_count: usize) -> Result<()> {
		self.bands.class_inner_classes_n.expect_length(total_count);
		self.bands.class_inner_classes_n.read_from(&mut self.input, &mut self.headers)?;
		let tuple_count = self.bands.class_inner_classes_n.len_total()?;
		self.bands.class_inner_classes_rc.expect_length(tuple_count);
		self.bands.class_inner_classes_rc.read_from(&mut self.input, &mut self.headers)?;
		self.bands.class_inner_classes_f.expect_length(tuple_count);
		self.bands.class_inner_classes_f.read_from(&mut self.input, &mut self.headers)?;
		let long_count = tuple_count - self.bands.class_inner_classes_f.int_count(0);
		self.bands.class_inner_classes_outer_rcn.expect_length(long_count);
		self.bands.class_inner_classes_outer_rcn.read_from(&mut self.input, &mut self.headers)?;
		self.bands.class_inner_classes_name_run.expect_length(long_count);
		self.bands.class_inner_classes_name_run.read_from(&mut self.input, &mut self.headers)?;
		Ok(())
	}

	/// Sizes and fills every band of one layout, walking callables in
	/// declaration order and threading forward-call counts through.
	fn read_layout_bands(&mut self, ctx: Ctx, handle: LayoutHandle, total_count: usize) -> Result<()> {
		let def = self.attr_defs().get(handle).clone();
		let mut bands = self
			.elem_bands
			.remove(&handle)
			.unwrap_or_else(|| make_elem_bands(&def));
		let result = (|| -> Result<()> {
			if !def.has_callables() {
				return self.read_elem_bands(&def.elems, total_count, &mut [], &mut bands);
			}
			let mut forward: Vec<i64> = vec![0; def.callables.len()];
			forward[0] = total_count as i64;
			for (j, callable) in def.callables.iter().enumerate() {
				let mut entry_count = forward[j];
				debug_assert!(entry_count >= 0);
				forward[j] = -1; // no more, please
				if total_count > 0 && callable.back {
					entry_count += self.bands.attr[ctx as usize].attr_calls.get_int()? as i64;
				}
				self.read_elem_bands(&callable.body, entry_count as usize, &mut forward, &mut bands)?;
			}
			Ok(())
		})();
		self.elem_bands.insert(handle, bands);
		result.with_context(|| anyhow!("while sizing bands of attribute {}", def.name))
	}

	fn read_elem_bands(
		&mut self,
		elems: &[Elem],
		count: usize,
		forward: &mut [i64],
		bands: &mut [ElemBand],
	) -> Result<()> {
		for elem in elems {
			match elem {
				Elem::Int { band, .. }
				| Elem::Flag { band, .. }
				| Elem::Bci { band, .. }
				| Elem::Bco { band, .. } => {
					let b = bands[*band].int();
					b.expect_length(count);
					b.read_from(&mut self.input, &mut self.headers)?;
				}
				Elem::Ref { band, .. } => {
					let b = bands[*band].reference();
					b.expect_length(count);
					b.read_from(&mut self.input, &mut self.headers)?;
				}
				Elem::Repl { band, body, .. } => {
					let b = bands[*band].int();
					b.expect_length(count);
					b.read_from(&mut self.input, &mut self.headers)?;
					let rep_count = b.len_total()?;
					self.read_elem_bands(body, rep_count, forward, bands)?;
				}
				Elem::Union { band, cases, default_body, .. } => {
					let b = bands[*band].int();
					b.expect_length(count);
					b.read_from(&mut self.input, &mut self.headers)?;
					let mut remaining = count;
					for case in cases {
						let case_count: usize = case
							.values
							.iter()
							.map(|&v| bands[*band].int().int_count(v))
							.sum();
						remaining = remaining
							.checked_sub(case_count)
							.ok_or_else(|| anyhow!("union cases exceed the tag count"))?;
						self.read_elem_bands(&case.body, case_count, forward, bands)?;
					}
					self.read_elem_bands(default_body, remaining, forward, bands)?;
				}
				Elem::Call { target, back } => {
					if !*back {
						// Backward calls are pre-counted; push forward.
						debug_assert!(forward[*target] >= 0);
						forward[*target] += count as i64;
					}
				}
			}
		}
		Ok(())
	}

	/// Expands band values into attribute content for every holder, in
	/// holder order, then retires the layouts' bands.
	pub(crate) fn read_attrs(&mut self, ctx: Ctx, holders: &[HolderId]) -> Result<()> {
		let mut saw_defs: Vec<LayoutHandle> = Vec::new();
		for &h in holders {
			let attr_count = self.holder_attrs_mut(h).len();
			for j in 0..attr_count {
				let attr = &self.holder_attrs_mut(h)[j];
				let handle = attr.layout;
				let def = self.attr_defs().get(handle);
				if def.band_count == 0 {
					if handle == self.attr_defs().inner_classes {
						let HolderId::Class(c) = h else {
							bail!("InnerClasses attribute outside a class holder");
						};
						self.read_local_inner_classes(c)?;
					}
					// canonical empty attrs (Deprecated, Code) stand as-is
					continue;
				}
				if !saw_defs.contains(&handle) {
					saw_defs.push(handle);
				}
				let kq_tag = if handle == self.attr_defs().constant_value {
					let HolderId::Field(c, f) = h else {
						bail!("ConstantValue attribute outside a field holder");
					};
					Some(self.field_literal_tag(c, f)?)
				} else {
					None
				};
				let (bytes, fixups) = self.unparse_attr(handle, h, kq_tag)?;
				let attr = &mut self.holder_attrs_mut(h)[j];
				attr.bytes = bytes;
				attr.fixups = fixups;
			}
		}

		for handle in saw_defs {
			for band in self.elem_bands.get_mut(&handle).into_iter().flatten() {
				match band {
					ElemBand::Int(b) => b.done_disbursing()?,
					ElemBand::Ref(b) => b.done_disbursing()?,
				}
			}
		}

		if ctx == Ctx::Class {
			self.bands.class_inner_classes_n.done_disbursing()?;
			self.bands.class_inner_classes_rc.done_disbursing()?;
			self.bands.class_inner_classes_f.done_disbursing()?;
			self.bands.class_inner_classes_outer_rcn.done_disbursing()?;
			self.bands.class_inner_classes_name_run.done_disbursing()?;
		}
		Ok(())
	}

	/// The pool a field's `ConstantValue` draws from, per its descriptor.
	fn field_literal_tag(&self, c: usize, f: usize) -> Result<Tag> {
		let desc = self.pkg.classes[c].fields[f].descriptor;
		let Entry::NameAndType { typ, .. } = self.pkg.pool.entry(desc) else {
			bail!("field descriptor is not a Descr entry");
		};
		let text = match self.pkg.pool.entry(*typ) {
			Entry::Signature { erased, .. } => self.pkg.pool.utf8_text(*erased)?,
			Entry::Utf8(_) => self.pkg.pool.utf8_text(*typ)?,
			e => bail!("field type is not a signature: {:?}", e.tag()),
		};
		Ok(match text.as_bytes().first() {
			Some(b'B' | b'S' | b'C' | b'Z' | b'I') => Tag::Int,
			Some(b'F') => Tag::Float,
			Some(b'J') => Tag::Long,
			Some(b'D') => Tag::Double,
			_ => Tag::String,
		})
	}

	/// Walks one attribute instance's layout tree, pulling one value per
	/// element band and serializing classfile-format content.
	fn unparse_attr(
		&mut self,
		handle: LayoutHandle,
		h: HolderId,
		kq_tag: Option<Tag>,
	) -> Result<(Vec<u8>, crate::fixups::Fixups)> {
		let def = self.attr_defs().get(handle).clone();
		let mut bands = self
			.elem_bands
			.remove(&handle)
			.ok_or_else(|| anyhow!("bands of {} were never sized", def.name))?;
		let mut walker = AttrWalker {
			reader: self,
			def: &def,
			bands: &mut bands,
			holder: h,
			kq_tag,
			out: Vec::new(),
			fixups: crate::fixups::Fixups::new(),
			prev_bci: 0,
		};
		let result = if def.has_callables() {
			walker.walk(&def.callables[0].body)
		} else {
			walker.walk(&def.elems)
		};
		let output = (walker.out, walker.fixups);
		self.elem_bands.insert(handle, bands);
		result.with_context(|| anyhow!("while expanding attribute {}", def.name))?;
		Ok(output)
	}

	/// Reads one class's local `InnerClasses` tuples; a zero flag word
	/// copies the global tuple for that class.
	fn read_local_inner_classes(&mut self, c: usize) -> Result<()> {
		let n = self.bands.class_inner_classes_n.get_len()?;
		let mut local = Vec::with_capacity(n);
		for _ in 0..n {
			let this_class = self.bands.class_inner_classes_rc.get_ref(&self.pkg.pool)?;
			let mut flags = self.bands.class_inner_classes_f.get_int()? as u32;
			if flags == 0 {
				let ic = self
					.pkg
					.global_inner_class(this_class)
					.ok_or_else(|| anyhow!("local tuple copies a missing global inner class"))?;
				local.push(*ic);
			} else {
				if flags == ACC_IC_LONG_FORM {
					flags = 0; // clear the marker bit
				}
				let outer = self.bands.class_inner_classes_outer_rcn.get_ref_opt(&self.pkg.pool)?;
				let name = self.bands.class_inner_classes_name_run.get_ref_opt(&self.pkg.pool)?;
				local.push(InnerClass { this_class, outer_class: outer, name, flags });
			}
		}
		self.pkg.classes[c].inner_classes = Some(local);
		// The implied tuples cannot be reconciled yet; that waits for the
		// local constant pool.
		Ok(())
	}
}

/// Expansion state for one attribute instance.
struct AttrWalker<'a, R: Read> {
	reader: &'a mut ArchiveReader<R>,
	def: &'a AttrLayout,
	bands: &'a mut [ElemBand],
	holder: HolderId,
	kq_tag: Option<Tag>,
	out: Vec<u8>,
	fixups: crate::fixups::Fixups,
	/// Previous renumbered BCI, for `PO`/`O` elements.
	prev_bci: i32,
}

impl<R: Read> AttrWalker<'_, R> {
	fn emit(&mut self, value: i64, size: u8) {
		for k in (0..size).rev() {
			self.out.push((value >> (8 * k)) as u8);
		}
	}

	fn code(&self) -> Result<&crate::tree::member::Code> {
		let HolderId::Code(k) = self.holder else {
			bail!("bytecode index element outside a code attribute");
		};
		let (c, m) = self.reader.codes[k];
		Ok(self.reader.pkg.classes[c].methods[m].code.as_ref().expect("code exists"))
	}

	fn walk(&mut self, elems: &[Elem]) -> Result<()> {
		for elem in elems {
			match elem {
				Elem::Int { band, size, .. } | Elem::Flag { band, size, .. } => {
					let v = self.bands[*band].int().get_int()?;
					self.emit(v as i64, *size);
				}
				Elem::Bci { band, delta, size } => {
					let v = self.bands[*band].int().get_int()?;
					let enc = if *delta { self.prev_bci + v } else { v };
					let bci = self.code()?.decode_bci(enc)?;
					self.prev_bci = enc;
					self.emit(bci as i64, *size);
				}
				Elem::Bco { band, size, .. } => {
					let v = self.bands[*band].int().get_int()?;
					let enc = self.prev_bci + v;
					let code = self.code()?;
					let span = code.decode_bci(enc)? - code.decode_bci(self.prev_bci)?;
					self.prev_bci = enc;
					self.emit(span as i64, *size);
				}
				Elem::Ref { band, tag, size, .. } => {
					let b = self.bands[*band].reference();
					let entry = match (tag, self.kq_tag) {
						(RefTag::FieldSpecific, Some(kq)) => {
							Some(b.get_ref_with_tag(&self.reader.pkg.pool, kq)?)
						}
						(RefTag::FieldSpecific, None) => {
							bail!("field-specific reference outside a ConstantValue")
						}
						(RefTag::Pool(_), _) => b.get_ref_opt(&self.reader.pkg.pool)?,
					};
					let at = self.out.len();
					self.emit(0, *size);
					if let Some(mut entry) = entry {
						// signatures erase to plain descriptors in output
						if self.reader.pkg.pool.tag_of(entry) == Tag::Signature {
							entry = self.reader.pkg.pool.erased_utf8(entry)?;
						}
						match size {
							1 => self.fixups.add_u1(at, entry),
							2 => self.fixups.add_u2(at, entry),
							_ => bail!("unsupported reference width {}", size),
						}
					}
				}
				Elem::Repl { band, size, body } => {
					let n = self.bands[*band].int().get_len()?;
					self.emit(n as i64, *size);
					for _ in 0..n {
						self.walk(body)?;
					}
				}
				Elem::Union { band, size, cases, default_body, .. } => {
					let v = self.bands[*band].int().get_int()?;
					self.emit(v as i64, *size);
					let body = cases
						.iter()
						.find(|case| case.values.contains(&v))
						.map(|case| &case.body)
						.unwrap_or(default_body);
					self.walk(body)?;
				}
				Elem::Call { target, .. } => {
					let def = self.def;
					self.walk(&def.callables[*target].body)?;
				}
			}
		}
		Ok(())
	}
}
