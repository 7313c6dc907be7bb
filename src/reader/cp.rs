//! The `cp_bands` group: all sixteen tag pools, in tag order.

use std::io::Read;

use anyhow::{anyhow, bail, Result};
use log::info;

use crate::constants::Tag;
use crate::jstring;
use crate::pool::{Entry, EntryRef};
use crate::reader::ArchiveReader;

impl<R: Read> ArchiveReader<R> {
	pub(crate) fn read_constant_pool(&mut self) -> Result<()> {
		for tag in Tag::IN_ORDER {
			let len = self.tag_count(tag);
			if len > 0 {
				info!("reading {} {} entries", len, tag.name());
			}
			let entries = match tag {
				Tag::Utf8 => self.read_utf8_bands(len)?,
				Tag::Int => {
					self.bands.cp_int.expect_length(len);
					self.bands.cp_int.read_from(&mut self.input, &mut self.headers)?;
					let mut out = Vec::with_capacity(len);
					for _ in 0..len {
						let x = self.bands.cp_int.get_int()?;
						out.push(self.pkg.pool.intern(Entry::Int(x)));
					}
					self.bands.cp_int.done_disbursing()?;
					out
				}
				Tag::Float => {
					self.bands.cp_float.expect_length(len);
					self.bands.cp_float.read_from(&mut self.input, &mut self.headers)?;
					let mut out = Vec::with_capacity(len);
					for _ in 0..len {
						let x = self.bands.cp_float.get_int()?;
						out.push(self.pkg.pool.intern(Entry::Float(x as u32)));
					}
					self.bands.cp_float.done_disbursing()?;
					out
				}
				Tag::Long => {
					self.bands.cp_long_hi.expect_length(len);
					self.bands.cp_long_hi.read_from(&mut self.input, &mut self.headers)?;
					self.bands.cp_long_lo.expect_length(len);
					self.bands.cp_long_lo.read_from(&mut self.input, &mut self.headers)?;
					let mut out = Vec::with_capacity(len);
					for _ in 0..len {
						let hi = self.bands.cp_long_hi.get_int()? as u32 as u64;
						let lo = self.bands.cp_long_lo.get_int()? as u32 as u64;
						out.push(self.pkg.pool.intern(Entry::Long(((hi << 32) | lo) as i64)));
					}
					self.bands.cp_long_hi.done_disbursing()?;
					self.bands.cp_long_lo.done_disbursing()?;
					out
				}
				Tag::Double => {
					self.bands.cp_double_hi.expect_length(len);
					self.bands.cp_double_hi.read_from(&mut self.input, &mut self.headers)?;
					self.bands.cp_double_lo.expect_length(len);
					self.bands.cp_double_lo.read_from(&mut self.input, &mut self.headers)?;
					let mut out = Vec::with_capacity(len);
					for _ in 0..len {
						let hi = self.bands.cp_double_hi.get_int()? as u32 as u64;
						let lo = self.bands.cp_double_lo.get_int()? as u32 as u64;
						out.push(self.pkg.pool.intern(Entry::Double((hi << 32) | lo)));
					}
					self.bands.cp_double_hi.done_disbursing()?;
					self.bands.cp_double_lo.done_disbursing()?;
					out
				}
				Tag::String => {
					self.bands.cp_string.expect_length(len);
					self.bands.cp_string.read_from(&mut self.input, &mut self.headers)?;
					let mut out = Vec::with_capacity(len);
					for _ in 0..len {
						let utf8 = self.bands.cp_string.get_ref(&self.pkg.pool)?;
						out.push(self.pkg.pool.intern(Entry::String(utf8)));
					}
					self.bands.cp_string.done_disbursing()?;
					out
				}
				Tag::Class => {
					self.bands.cp_class.expect_length(len);
					self.bands.cp_class.read_from(&mut self.input, &mut self.headers)?;
					let mut out = Vec::with_capacity(len);
					for _ in 0..len {
						let utf8 = self.bands.cp_class.get_ref(&self.pkg.pool)?;
						out.push(self.pkg.pool.intern(Entry::Class(utf8)));
					}
					self.bands.cp_class.done_disbursing()?;
					out
				}
				Tag::Signature => self.read_signature_bands(len)?,
				Tag::NameAndType => {
					self.bands.cp_descr_name.expect_length(len);
					self.bands.cp_descr_name.read_from(&mut self.input, &mut self.headers)?;
					self.bands.cp_descr_type.expect_length(len);
					self.bands.cp_descr_type.read_from(&mut self.input, &mut self.headers)?;
					let mut out = Vec::with_capacity(len);
					for _ in 0..len {
						let name = self.bands.cp_descr_name.get_ref(&self.pkg.pool)?;
						let typ = self.bands.cp_descr_type.get_ref(&self.pkg.pool)?;
						out.push(self.pkg.pool.intern(Entry::NameAndType { name, typ }));
					}
					self.bands.cp_descr_name.done_disbursing()?;
					self.bands.cp_descr_type.done_disbursing()?;
					out
				}
				Tag::Fieldref => self.read_member_refs(Tag::Fieldref, len)?,
				Tag::Methodref => self.read_member_refs(Tag::Methodref, len)?,
				Tag::InterfaceMethodref => self.read_member_refs(Tag::InterfaceMethodref, len)?,
				Tag::MethodHandle => {
					if len > 0 {
						self.check_legacy("cp_MethodHandle")?;
					}
					self.bands.cp_method_handle_refkind.expect_length(len);
					self.bands.cp_method_handle_refkind.read_from(&mut self.input, &mut self.headers)?;
					self.bands.cp_method_handle_member.expect_length(len);
					self.bands.cp_method_handle_member.read_from(&mut self.input, &mut self.headers)?;
					let mut out = Vec::with_capacity(len);
					for _ in 0..len {
						let ref_kind = self.bands.cp_method_handle_refkind.get_int()? as u8;
						let member = self.bands.cp_method_handle_member.get_ref(&self.pkg.pool)?;
						out.push(self.pkg.pool.intern(Entry::MethodHandle { ref_kind, member }));
					}
					self.bands.cp_method_handle_refkind.done_disbursing()?;
					self.bands.cp_method_handle_member.done_disbursing()?;
					out
				}
				Tag::MethodType => {
					if len > 0 {
						self.check_legacy("cp_MethodType")?;
					}
					self.bands.cp_method_type.expect_length(len);
					self.bands.cp_method_type.read_from(&mut self.input, &mut self.headers)?;
					let mut out = Vec::with_capacity(len);
					for _ in 0..len {
						let sig = self.bands.cp_method_type.get_ref(&self.pkg.pool)?;
						out.push(self.pkg.pool.intern(Entry::MethodType(sig)));
					}
					self.bands.cp_method_type.done_disbursing()?;
					out
				}
				Tag::InvokeDynamic => {
					if len > 0 {
						self.check_legacy("cp_InvokeDynamic")?;
					}
					self.bands.cp_invoke_dynamic_spec.expect_length(len);
					self.bands.cp_invoke_dynamic_spec.read_from(&mut self.input, &mut self.headers)?;
					self.bands.cp_invoke_dynamic_desc.expect_length(len);
					self.bands.cp_invoke_dynamic_desc.read_from(&mut self.input, &mut self.headers)?;
					let mut out = Vec::with_capacity(len);
					for _ in 0..len {
						let bsm = self.bands.cp_invoke_dynamic_spec.get_ref(&self.pkg.pool)?;
						let desc = self.bands.cp_invoke_dynamic_desc.get_ref(&self.pkg.pool)?;
						out.push(self.pkg.pool.intern(Entry::InvokeDynamic { bsm, desc }));
					}
					self.bands.cp_invoke_dynamic_spec.done_disbursing()?;
					self.bands.cp_invoke_dynamic_desc.done_disbursing()?;
					out
				}
				Tag::BootstrapMethod => {
					if len > 0 {
						self.check_legacy("cp_BootstrapMethod")?;
					}
					self.bands.cp_bootstrap_method_ref.expect_length(len);
					self.bands.cp_bootstrap_method_ref.read_from(&mut self.input, &mut self.headers)?;
					self.bands.cp_bootstrap_method_arg_count.expect_length(len);
					self.bands.cp_bootstrap_method_arg_count.read_from(&mut self.input, &mut self.headers)?;
					let total_args = self.bands.cp_bootstrap_method_arg_count.len_total()?;
					self.bands.cp_bootstrap_method_arg.expect_length(total_args);
					self.bands.cp_bootstrap_method_arg.read_from(&mut self.input, &mut self.headers)?;
					let mut out = Vec::with_capacity(len);
					for _ in 0..len {
						let bsm = self.bands.cp_bootstrap_method_ref.get_ref(&self.pkg.pool)?;
						let argc = self.bands.cp_bootstrap_method_arg_count.get_len()?;
						let mut args = Vec::with_capacity(argc);
						for _ in 0..argc {
							args.push(self.bands.cp_bootstrap_method_arg.get_ref(&self.pkg.pool)?);
						}
						out.push(self.pkg.pool.intern(Entry::BootstrapMethod { bsm, args }));
					}
					self.bands.cp_bootstrap_method_ref.done_disbursing()?;
					self.bands.cp_bootstrap_method_arg_count.done_disbursing()?;
					self.bands.cp_bootstrap_method_arg.done_disbursing()?;
					out
				}
				_ => bail!("unexpected CP tag {} in package", tag.name()),
			};
			self.pkg.pool.init_tag_index(tag, entries);
		}
		Ok(())
	}

	/// The five `cp_Utf8` bands. Strings share prefixes with their
	/// predecessor; a zero suffix length escapes to the big-suffix path,
	/// which gives the string its own character band.
	fn read_utf8_bands(&mut self, len: usize) -> Result<Vec<EntryRef>> {
		if len == 0 {
			return Ok(Vec::new());
		}

		// Bands have implicit leading zeroes, for the empty string.
		const SUFFIX_SKIP_1: usize = 1;
		const PREFIX_SKIP_2: usize = 2;

		self.bands.cp_utf8_prefix.expect_length(len.saturating_sub(PREFIX_SKIP_2));
		self.bands.cp_utf8_prefix.read_from(&mut self.input, &mut self.headers)?;
		self.bands.cp_utf8_suffix.expect_length(len.saturating_sub(SUFFIX_SKIP_1));
		self.bands.cp_utf8_suffix.read_from(&mut self.input, &mut self.headers)?;

		let mut suffix_chars: Vec<Option<Vec<u16>>> = vec![None; len];
		let mut big_suffix_count = 0;

		// Character values of all normally packed suffixes.
		self.bands.cp_utf8_chars.expect_length(self.bands.cp_utf8_suffix.len_total()?);
		self.bands.cp_utf8_chars.read_from(&mut self.input, &mut self.headers)?;
		for (i, slot) in suffix_chars.iter_mut().enumerate() {
			let suffix = if i < SUFFIX_SKIP_1 { 0 } else { self.bands.cp_utf8_suffix.get_len()? };
			if suffix == 0 && i >= SUFFIX_SKIP_1 {
				// chars are packed in a big-suffix band
				big_suffix_count += 1;
				continue;
			}
			let mut chars = Vec::with_capacity(suffix);
			for _ in 0..suffix {
				chars.push(self.bands.cp_utf8_chars.get_int()? as u16);
			}
			*slot = Some(chars);
		}
		self.bands.cp_utf8_chars.done_disbursing()?;

		// Sizing pass over the specially packed strings.
		let mut max_chars = 0;
		self.bands.cp_utf8_big_suffix.expect_length(big_suffix_count);
		self.bands.cp_utf8_big_suffix.read_from(&mut self.input, &mut self.headers)?;
		self.bands.cp_utf8_suffix.reset_for_second_pass();
		for i in 0..len {
			let mut suffix = if i < SUFFIX_SKIP_1 { 0 } else { self.bands.cp_utf8_suffix.get_len()? };
			let prefix = if i < PREFIX_SKIP_2 { 0 } else { self.bands.cp_utf8_prefix.get_len()? };
			if suffix == 0 && i >= SUFFIX_SKIP_1 {
				suffix = self.bands.cp_utf8_big_suffix.get_len()?;
			}
			max_chars = max_chars.max(prefix + suffix);
		}
		let mut buf: Vec<u16> = vec![0; max_chars];

		// Pull in the specially packed characters, one band per string.
		self.bands.cp_utf8_suffix.reset_for_second_pass();
		self.bands.cp_utf8_big_suffix.reset_for_second_pass();
		for (i, slot) in suffix_chars.iter_mut().enumerate() {
			if i < SUFFIX_SKIP_1 {
				continue;
			}
			if self.bands.cp_utf8_suffix.get_len()? != 0 {
				continue; // already input
			}
			let suffix = self.bands.cp_utf8_big_suffix.get_len()?;
			if suffix == 0 {
				// Do not bother with an empty band.
				*slot = Some(Vec::new());
				continue;
			}
			let mut packed = crate::band::IntBand::new(
				format!("(Utf8_big_{i})"),
				crate::coding::DELTA5,
			);
			packed.expect_length(suffix);
			packed.read_from(&mut self.input, &mut self.headers)?;
			let mut chars = Vec::with_capacity(suffix);
			for _ in 0..suffix {
				chars.push(packed.get_int()? as u16);
			}
			packed.done_disbursing()?;
			*slot = Some(chars);
		}

		// Finally, sew together all the prefixes and suffixes.
		self.bands.cp_utf8_prefix.reset_for_second_pass();
		self.bands.cp_utf8_suffix.reset_for_second_pass();
		self.bands.cp_utf8_big_suffix.reset_for_second_pass();
		let mut out = Vec::with_capacity(len);
		for (i, slot) in suffix_chars.iter().enumerate() {
			let prefix = if i < PREFIX_SKIP_2 { 0 } else { self.bands.cp_utf8_prefix.get_len()? };
			let mut suffix = if i < SUFFIX_SKIP_1 { 0 } else { self.bands.cp_utf8_suffix.get_len()? };
			if suffix == 0 && i >= SUFFIX_SKIP_1 {
				suffix = self.bands.cp_utf8_big_suffix.get_len()?;
			}
			let chars = slot.as_deref().unwrap_or(&[]);
			if chars.len() != suffix {
				bail!("Utf8 suffix {} does not match its {} chars", suffix, chars.len());
			}
			// by induction, the buffer already holds the previous string,
			// and with it this string's prefix
			buf[prefix..prefix + suffix].copy_from_slice(chars);
			let string = jstring::from_code_units(&buf[..prefix + suffix])?;
			out.push(self.pkg.pool.utf8(string));
		}
		self.bands.cp_utf8_prefix.done_disbursing()?;
		self.bands.cp_utf8_suffix.done_disbursing()?;
		self.bands.cp_utf8_big_suffix.done_disbursing()?;
		Ok(out)
	}

	/// `cp_Signature`: a Utf8 form plus one class reference per `L` slot.
	fn read_signature_bands(&mut self, len: usize) -> Result<Vec<EntryRef>> {
		self.bands.cp_signature_form.expect_length(len);
		self.bands.cp_signature_form.read_from(&mut self.input, &mut self.headers)?;
		let mut class_counts = Vec::with_capacity(len);
		let mut total = 0;
		for _ in 0..len {
			let form = self.bands.cp_signature_form.get_ref(&self.pkg.pool)?;
			let n = self.pkg.pool.count_class_parts(form)?;
			class_counts.push(n);
			total += n;
		}
		self.bands.cp_signature_form.reset_for_second_pass();
		self.bands.cp_signature_classes.expect_length(total);
		self.bands.cp_signature_classes.read_from(&mut self.input, &mut self.headers)?;
		let mut out = Vec::with_capacity(len);
		for &n in &class_counts {
			let form = self.bands.cp_signature_form.get_ref(&self.pkg.pool)?;
			let mut classes = Vec::with_capacity(n);
			for _ in 0..n {
				classes.push(self.bands.cp_signature_classes.get_ref(&self.pkg.pool)?);
			}
			let sig = self.pkg.pool.make_signature(form, classes)?;
			let erased = self.pkg.pool.erased_utf8(sig)?;
			self.utf8_signatures.insert(erased, sig);
			out.push(sig);
		}
		self.bands.cp_signature_form.done_disbursing()?;
		self.bands.cp_signature_classes.done_disbursing()?;
		Ok(out)
	}

	fn read_member_refs(&mut self, tag: Tag, len: usize) -> Result<Vec<EntryRef>> {
		let (class_band, desc_band) = match tag {
			Tag::Fieldref => (&mut self.bands.cp_field_class, &mut self.bands.cp_field_desc),
			Tag::Methodref => (&mut self.bands.cp_method_class, &mut self.bands.cp_method_desc),
			Tag::InterfaceMethodref => {
				(&mut self.bands.cp_imethod_class, &mut self.bands.cp_imethod_desc)
			}
			_ => return Err(anyhow!("{} is not a member tag", tag.name())),
		};
		class_band.expect_length(len);
		class_band.read_from(&mut self.input, &mut self.headers)?;
		desc_band.expect_length(len);
		desc_band.read_from(&mut self.input, &mut self.headers)?;
		let mut out = Vec::with_capacity(len);
		for _ in 0..len {
			let class = class_band.get_ref(&self.pkg.pool)?;
			let desc = desc_band.get_ref(&self.pkg.pool)?;
			out.push(self.pkg.pool.intern(Entry::Member { tag, class, desc }));
		}
		class_band.done_disbursing()?;
		desc_band.done_disbursing()?;
		Ok(out)
	}
}
