//! The `class_bands` group: class headers, member descriptors, attribute
//! decoding for every context, and the code headers.

use std::io::Read;

use anyhow::{bail, Result};
use log::debug;

use crate::constants::archive_options::AO_HAVE_ALL_CODE_FLAGS;
use crate::constants::Ctx;
use crate::reader::attrs::HolderId;
use crate::reader::ArchiveReader;
use crate::tree::class::Class;
use crate::tree::member::{Code, Field, Handler, Method};

/// Short code headers pack (stack, locals, handlers) into one byte; zero
/// means a long header with explicit bands. The packing leaves room for
/// up to two handlers.
const SHORT_CODE_LIMITS: [(u8, u8); 3] = [(12, 12), (8, 8), (7, 7)];
const LONG_CODE_HEADER: u8 = 0;

fn short_code_header_base(h: usize) -> u32 {
	let mut sc = 1;
	for &(lims, liml) in &SHORT_CODE_LIMITS[..h] {
		sc += lims as u32 * liml as u32;
	}
	sc
}

/// Splits a nonzero code-header byte into (max_stack, max_na_locals,
/// handler_count).
fn decode_short_code_header(sc: u8) -> Option<(u16, u16, u16)> {
	let sc = sc as u32;
	for h in 0..SHORT_CODE_LIMITS.len() {
		let base = short_code_header_base(h);
		let (lims, _) = SHORT_CODE_LIMITS[h];
		let span = lims as u32 * SHORT_CODE_LIMITS[h].1 as u32;
		if sc >= base && sc < base + span {
			let stack = (sc - base) % lims as u32;
			let locals = (sc - base) / lims as u32;
			return Some((stack as u16, locals as u16, h as u16));
		}
	}
	None
}

impl<R: Read> ArchiveReader<R> {
	pub(crate) fn read_classes(&mut self) -> Result<()> {
		let n = self.num_classes;
		debug!("building {} classes", n);
		self.bands.class_this.expect_length(n);
		self.bands.class_super.expect_length(n);
		self.bands.class_interface_count.expect_length(n);
		self.bands.class_this.read_from(&mut self.input, &mut self.headers)?;
		self.bands.class_super.read_from(&mut self.input, &mut self.headers)?;
		self.bands.class_interface_count.read_from(&mut self.input, &mut self.headers)?;
		self.bands.class_interface.expect_length(self.bands.class_interface_count.len_total()?);
		self.bands.class_interface.read_from(&mut self.input, &mut self.headers)?;
		for _ in 0..n {
			let this_class = self.bands.class_this.get_ref(&self.pkg.pool)?;
			let super_class = self.bands.class_super.get_ref(&self.pkg.pool)?;
			let ic = self.bands.class_interface_count.get_len()?;
			let mut interfaces = Vec::with_capacity(ic);
			for _ in 0..ic {
				interfaces.push(self.bands.class_interface.get_ref(&self.pkg.pool)?);
			}
			// The packer encodes the rare null super as this_class itself.
			let super_class = (super_class != this_class).then_some(super_class);
			self.pkg.classes.push(Class::new(this_class, super_class, interfaces));
		}
		self.bands.class_this.done_disbursing()?;
		self.bands.class_super.done_disbursing()?;
		self.bands.class_interface_count.done_disbursing()?;
		self.bands.class_interface.done_disbursing()?;

		self.read_members()?;
		let class_holders: Vec<HolderId> = (0..n).map(HolderId::Class).collect();
		self.count_and_read_attrs(Ctx::Class, &class_holders)?;
		self.read_code_headers()?;
		Ok(())
	}

	fn read_members(&mut self) -> Result<()> {
		let n = self.num_classes;
		self.bands.class_field_count.expect_length(n);
		self.bands.class_method_count.expect_length(n);
		self.bands.class_field_count.read_from(&mut self.input, &mut self.headers)?;
		self.bands.class_method_count.read_from(&mut self.input, &mut self.headers)?;

		let total_nf = self.bands.class_field_count.len_total()?;
		let total_nm = self.bands.class_method_count.len_total()?;
		debug!("expecting {} fields and {} methods", total_nf, total_nm);

		self.bands.field_descr.expect_length(total_nf);
		self.bands.field_descr.read_from(&mut self.input, &mut self.headers)?;
		let mut field_holders = Vec::with_capacity(total_nf);
		for c in 0..n {
			let nf = self.bands.class_field_count.get_len()?;
			for f in 0..nf {
				let descriptor = self.bands.field_descr.get_ref(&self.pkg.pool)?;
				self.pkg.classes[c].fields.push(Field {
					flags: 0,
					descriptor,
					attributes: Vec::new(),
				});
				field_holders.push(HolderId::Field(c, f));
			}
		}
		self.bands.class_field_count.done_disbursing()?;
		self.bands.field_descr.done_disbursing()?;
		self.count_and_read_attrs(Ctx::Field, &field_holders)?;

		self.bands.method_descr.expect_length(total_nm);
		self.bands.method_descr.read_from(&mut self.input, &mut self.headers)?;
		let mut method_holders = Vec::with_capacity(total_nm);
		for c in 0..n {
			let nm = self.bands.class_method_count.get_len()?;
			for m in 0..nm {
				let descriptor = self.bands.method_descr.get_ref(&self.pkg.pool)?;
				self.pkg.classes[c].methods.push(Method {
					flags: 0,
					descriptor,
					attributes: Vec::new(),
					code: None,
				});
				method_holders.push(HolderId::Method(c, m));
			}
		}
		self.bands.class_method_count.done_disbursing()?;
		self.bands.method_descr.done_disbursing()?;
		self.count_and_read_attrs(Ctx::Method, &method_holders)?;

		// Up to this point, Code attributes look like empty attributes.
		// Promote their owners to code holders.
		self.build_code_attrs();
		Ok(())
	}

	fn build_code_attrs(&mut self) {
		let code_handle = self.attr_defs().code;
		for c in 0..self.pkg.classes.len() {
			for m in 0..self.pkg.classes[c].methods.len() {
				let method = &mut self.pkg.classes[c].methods[m];
				if method.attributes.iter().any(|a| a.layout == code_handle) {
					method.code = Some(Code::default());
					self.codes.push((c, m));
				}
			}
		}
	}

	fn read_code_headers(&mut self) -> Result<()> {
		let attrs_ok = self.test_option(AO_HAVE_ALL_CODE_FLAGS);
		self.bands.code_headers.expect_length(self.codes.len());
		self.bands.code_headers.read_from(&mut self.input, &mut self.headers)?;
		let mut long_codes = Vec::new();
		for k in 0..self.codes.len() {
			let sc = self.bands.code_headers.get_byte()?;
			if sc == LONG_CODE_HEADER {
				// ms/ml/nh arrive through the long-header bands.
				long_codes.push(k);
				continue;
			}
			let Some((stack, locals, handlers)) = decode_short_code_header(sc) else {
				bail!("unusable short code header {}", sc);
			};
			let code = self.code_mut(k);
			code.max_stack = stack;
			code.max_na_locals = locals;
			code.handlers = vec![
				Handler { class: None, start: 0, end: 0, catch: 0 };
				handlers as usize
			];
		}
		self.bands.code_headers.done_disbursing()?;

		self.bands.code_max_stack.expect_length(long_codes.len());
		self.bands.code_max_na_locals.expect_length(long_codes.len());
		self.bands.code_handler_count.expect_length(long_codes.len());
		self.bands.code_max_stack.read_from(&mut self.input, &mut self.headers)?;
		self.bands.code_max_na_locals.read_from(&mut self.input, &mut self.headers)?;
		self.bands.code_handler_count.read_from(&mut self.input, &mut self.headers)?;
		for &k in &long_codes {
			let stack = self.bands.code_max_stack.get_int()? as u16;
			let locals = self.bands.code_max_na_locals.get_int()? as u16;
			let handlers = self.bands.code_handler_count.get_len()?;
			let code = self.code_mut(k);
			code.max_stack = stack;
			code.max_na_locals = locals;
			code.handlers =
				vec![Handler { class: None, start: 0, end: 0, catch: 0 }; handlers];
		}
		self.bands.code_max_stack.done_disbursing()?;
		self.bands.code_max_na_locals.done_disbursing()?;
		self.bands.code_handler_count.done_disbursing()?;

		self.read_code_handlers()?;

		self.codes_with_flags = if attrs_ok {
			// Code attributes are common (debug info not stripped).
			(0..self.codes.len()).collect()
		} else {
			// Code attributes are very sparse.
			long_codes
		};
		let holders: Vec<HolderId> =
			self.codes_with_flags.iter().map(|&k| HolderId::Code(k)).collect();
		self.count_attrs(Ctx::Code, &holders)?;
		// attribute expansion waits until the bytecodes are scanned
		Ok(())
	}

	pub(crate) fn code_mut(&mut self, k: usize) -> &mut Code {
		let (c, m) = self.codes[k];
		self.pkg.classes[c].methods[m].code.as_mut().expect("code exists")
	}

	fn read_code_handlers(&mut self) -> Result<()> {
		let total: usize = (0..self.codes.len())
			.map(|k| {
				let (c, m) = self.codes[k];
				self.pkg.classes[c].methods[m].code.as_ref().expect("code exists").handlers.len()
			})
			.sum();
		self.bands.code_handler_start_p.expect_length(total);
		self.bands.code_handler_start_p.read_from(&mut self.input, &mut self.headers)?;
		self.bands.code_handler_end_po.expect_length(total);
		self.bands.code_handler_end_po.read_from(&mut self.input, &mut self.headers)?;
		self.bands.code_handler_catch_po.expect_length(total);
		self.bands.code_handler_catch_po.read_from(&mut self.input, &mut self.headers)?;
		self.bands.code_handler_class_rcn.expect_length(total);
		self.bands.code_handler_class_rcn.read_from(&mut self.input, &mut self.headers)?;
		for k in 0..self.codes.len() {
			let nh = {
				let (c, m) = self.codes[k];
				self.pkg.classes[c].methods[m].code.as_ref().expect("code exists").handlers.len()
			};
			for j in 0..nh {
				let class = self.bands.code_handler_class_rcn.get_ref_opt(&self.pkg.pool)?;
				// raw renumbered values for now; instruction boundaries
				// are not known yet
				let start = self.bands.code_handler_start_p.get_int()?;
				let end = self.bands.code_handler_end_po.get_int()?;
				let catch = self.bands.code_handler_catch_po.get_int()?;
				let code = self.code_mut(k);
				code.handlers[j] = Handler { class, start, end, catch };
			}
		}
		self.bands.code_handler_start_p.done_disbursing()?;
		self.bands.code_handler_end_po.done_disbursing()?;
		self.bands.code_handler_catch_po.done_disbursing()?;
		self.bands.code_handler_class_rcn.done_disbursing()?;
		Ok(())
	}

	/// Replaces the raw handler values by absolute byte offsets; the three
	/// columns are delta-cumulative in renumbered space.
	pub(crate) fn fixup_code_handlers(&mut self) -> Result<()> {
		for k in 0..self.codes.len() {
			let code = self.code_mut(k);
			for j in 0..code.handlers.len() {
				let h = code.handlers[j];
				let mut sum = h.start;
				let start = code.decode_bci(sum)?;
				sum += h.end;
				let end = code.decode_bci(sum)?;
				sum += h.catch;
				let catch = code.decode_bci(sum)?;
				code.handlers[j] = Handler { class: h.class, start, end, catch };
			}
		}
		Ok(())
	}
}

#[cfg(test)]
mod testing {
	use pretty_assertions::assert_eq;
	use super::*;

	#[test]
	fn short_code_header_regions() {
		// handler-free headers occupy 1..=144
		assert_eq!(decode_short_code_header(1), Some((0, 0, 0)));
		assert_eq!(decode_short_code_header(14), Some((1, 1, 0)));
		assert_eq!(decode_short_code_header(144), Some((11, 11, 0)));
		// one handler: 145..=208
		assert_eq!(decode_short_code_header(145), Some((0, 0, 1)));
		assert_eq!(decode_short_code_header(208), Some((7, 7, 1)));
		// two handlers: 209..=255
		assert_eq!(decode_short_code_header(209), Some((0, 0, 2)));
		assert_eq!(decode_short_code_header(255), Some((4, 6, 2)));
	}
}
