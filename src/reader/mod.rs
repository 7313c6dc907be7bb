//! The archive reader: a fixed pipeline over the band sequence
//!
//! ```text
//! file_header, *band_headers, cp_bands, attr_definition_bands,
//! ic_bands, class_bands, bc_bands, file_bands
//! ```
//!
//! Every band's length is derived from values read earlier, so the
//! pipeline order is the one ordering guarantee the whole decoder rests
//! on.

use std::collections::HashMap;
use std::io::Read;

use anyhow::{anyhow, bail, Result};
use indexmap::IndexSet;
use log::{debug, info, warn};

use crate::band::{BandHeaders, ByteBand, IntBand, RefBand};
use crate::coding::{BCI5, BRANCH5, DELTA5, MDELTA5, UDELTA5, UNSIGNED5};
use crate::constants::archive_options::*;
use crate::constants::header_len::*;
use crate::constants::{archive_version, Ctx, Tag, ACC_IC_LONG_FORM, ADH_BIT_IS_LSB, ADH_BIT_SHIFT, ADH_CONTEXT_MASK, ARCHIVE_MAGIC};
use crate::error::UnpackError;
use crate::layout::{AttrDefs, LayoutHandle};
use crate::limit::LimitedBuffer;
use crate::pool::EntryRef;
use crate::tree::class::InnerClass;
use crate::tree::package::Package;

mod attrs;
mod bytecode;
mod classes;
mod cp;
mod files;
mod reconstruct;

pub(crate) use attrs::ElemBand;

/// Per-context attribute control bands.
pub(crate) struct AttrCtxBands {
	pub flags_hi: IntBand,
	pub flags_lo: IntBand,
	pub attr_count: IntBand,
	pub attr_indexes: IntBand,
	pub attr_calls: IntBand,
}

impl AttrCtxBands {
	fn new(ctx: Ctx) -> AttrCtxBands {
		let name = |suffix| format!("{}_{}", ctx.name(), suffix);
		AttrCtxBands {
			flags_hi: IntBand::new(name("flags_hi"), UNSIGNED5),
			flags_lo: IntBand::new(name("flags_lo"), UNSIGNED5),
			attr_count: IntBand::new(name("attr_count"), UNSIGNED5),
			attr_indexes: IntBand::new(name("attr_indexes"), UNSIGNED5),
			attr_calls: IntBand::new(name("attr_calls"), UNSIGNED5),
		}
	}
}

/// Every fixed band of the archive, in one place; the reader sizes and
/// drains them strictly in archive order.
pub(crate) struct Bands {
	pub archive_magic: ByteBand,
	pub archive_header_0: IntBand,
	pub archive_header_s: IntBand,
	pub archive_header_1: IntBand,
	pub band_headers: ByteBand,

	pub cp_utf8_prefix: IntBand,
	pub cp_utf8_suffix: IntBand,
	pub cp_utf8_chars: IntBand,
	pub cp_utf8_big_suffix: IntBand,

	pub cp_int: IntBand,
	pub cp_float: IntBand,
	pub cp_long_hi: IntBand,
	pub cp_long_lo: IntBand,
	pub cp_double_hi: IntBand,
	pub cp_double_lo: IntBand,
	pub cp_string: RefBand,
	pub cp_class: RefBand,
	pub cp_signature_form: RefBand,
	pub cp_signature_classes: RefBand,
	pub cp_descr_name: RefBand,
	pub cp_descr_type: RefBand,
	pub cp_field_class: RefBand,
	pub cp_field_desc: RefBand,
	pub cp_method_class: RefBand,
	pub cp_method_desc: RefBand,
	pub cp_imethod_class: RefBand,
	pub cp_imethod_desc: RefBand,
	pub cp_method_handle_refkind: IntBand,
	pub cp_method_handle_member: RefBand,
	pub cp_method_type: RefBand,
	pub cp_invoke_dynamic_spec: RefBand,
	pub cp_invoke_dynamic_desc: RefBand,
	pub cp_bootstrap_method_ref: RefBand,
	pub cp_bootstrap_method_arg_count: IntBand,
	pub cp_bootstrap_method_arg: RefBand,

	pub attr_definition_headers: ByteBand,
	pub attr_definition_name: RefBand,
	pub attr_definition_layout: RefBand,

	pub ic_this_class: RefBand,
	pub ic_flags: IntBand,
	pub ic_outer_class: RefBand,
	pub ic_name: RefBand,

	pub class_this: RefBand,
	pub class_super: RefBand,
	pub class_interface_count: IntBand,
	pub class_interface: RefBand,
	pub class_field_count: IntBand,
	pub class_method_count: IntBand,
	pub field_descr: RefBand,
	pub method_descr: RefBand,

	pub attr: [AttrCtxBands; 4],

	pub class_inner_classes_n: IntBand,
	pub class_inner_classes_rc: RefBand,
	pub class_inner_classes_f: IntBand,
	pub class_inner_classes_outer_rcn: RefBand,
	pub class_inner_classes_name_run: RefBand,

	pub code_headers: ByteBand,
	pub code_max_stack: IntBand,
	pub code_max_na_locals: IntBand,
	pub code_handler_count: IntBand,
	pub code_handler_start_p: IntBand,
	pub code_handler_end_po: IntBand,
	pub code_handler_catch_po: IntBand,
	pub code_handler_class_rcn: RefBand,

	pub bc_case_count: IntBand,
	pub bc_case_value: IntBand,
	pub bc_byte: ByteBand,
	pub bc_short: IntBand,
	pub bc_local: IntBand,
	pub bc_label: IntBand,
	pub bc_intref: RefBand,
	pub bc_floatref: RefBand,
	pub bc_longref: RefBand,
	pub bc_doubleref: RefBand,
	pub bc_stringref: RefBand,
	pub bc_loadablevalueref: RefBand,
	pub bc_classref: RefBand,
	pub bc_fieldref: RefBand,
	pub bc_methodref: RefBand,
	pub bc_imethodref: RefBand,
	pub bc_indyref: RefBand,
	pub bc_thisfield: RefBand,
	pub bc_superfield: RefBand,
	pub bc_thismethod: RefBand,
	pub bc_supermethod: RefBand,
	/// Overload ordinals of `<init>` members, not pool indexes.
	pub bc_initref: IntBand,
	pub bc_escref: RefBand,
	pub bc_escrefsize: IntBand,
	pub bc_escsize: IntBand,
	pub bc_escbyte: ByteBand,

	pub file_name: RefBand,
	pub file_size_hi: IntBand,
	pub file_size_lo: IntBand,
	pub file_modtime: IntBand,
	pub file_options: IntBand,
}

impl Bands {
	fn new() -> Bands {
		Bands {
			archive_magic: ByteBand::new("archive_magic"),
			archive_header_0: IntBand::no_meta("archive_header_0", UNSIGNED5),
			archive_header_s: IntBand::no_meta("archive_header_S", UNSIGNED5),
			archive_header_1: IntBand::no_meta("archive_header_1", UNSIGNED5),
			band_headers: ByteBand::new("band_headers"),

			cp_utf8_prefix: IntBand::new("cp_Utf8_prefix", DELTA5),
			cp_utf8_suffix: IntBand::new("cp_Utf8_suffix", UNSIGNED5),
			cp_utf8_chars: IntBand::new("cp_Utf8_chars", crate::coding::CHAR3),
			cp_utf8_big_suffix: IntBand::new("cp_Utf8_big_suffix", DELTA5),

			cp_int: IntBand::new("cp_Int", UDELTA5),
			cp_float: IntBand::new("cp_Float", UDELTA5),
			cp_long_hi: IntBand::new("cp_Long_hi", UDELTA5),
			cp_long_lo: IntBand::new("cp_Long_lo", DELTA5),
			cp_double_hi: IntBand::new("cp_Double_hi", UDELTA5),
			cp_double_lo: IntBand::new("cp_Double_lo", DELTA5),
			cp_string: RefBand::new("cp_String", UDELTA5, Tag::Utf8),
			cp_class: RefBand::new("cp_Class", UDELTA5, Tag::Utf8),
			cp_signature_form: RefBand::new("cp_Signature_form", DELTA5, Tag::Utf8),
			cp_signature_classes: RefBand::new("cp_Signature_classes", UDELTA5, Tag::Class),
			cp_descr_name: RefBand::new("cp_Descr_name", UDELTA5, Tag::Utf8),
			cp_descr_type: RefBand::new("cp_Descr_type", DELTA5, Tag::Signature),
			cp_field_class: RefBand::new("cp_Field_class", DELTA5, Tag::Class),
			cp_field_desc: RefBand::new("cp_Field_desc", UDELTA5, Tag::NameAndType),
			cp_method_class: RefBand::new("cp_Method_class", DELTA5, Tag::Class),
			cp_method_desc: RefBand::new("cp_Method_desc", UDELTA5, Tag::NameAndType),
			cp_imethod_class: RefBand::new("cp_Imethod_class", DELTA5, Tag::Class),
			cp_imethod_desc: RefBand::new("cp_Imethod_desc", UDELTA5, Tag::NameAndType),
			cp_method_handle_refkind: IntBand::new("cp_MethodHandle_refkind", DELTA5),
			cp_method_handle_member: RefBand::new("cp_MethodHandle_member", UDELTA5, Tag::AnyMember),
			cp_method_type: RefBand::new("cp_MethodType", UDELTA5, Tag::Signature),
			cp_invoke_dynamic_spec: RefBand::new("cp_InvokeDynamic_spec", UDELTA5, Tag::BootstrapMethod),
			cp_invoke_dynamic_desc: RefBand::new("cp_InvokeDynamic_desc", UDELTA5, Tag::NameAndType),
			cp_bootstrap_method_ref: RefBand::new("cp_BootstrapMethod_ref", DELTA5, Tag::MethodHandle),
			cp_bootstrap_method_arg_count: IntBand::new("cp_BootstrapMethod_arg_count", UDELTA5),
			cp_bootstrap_method_arg: RefBand::new("cp_BootstrapMethod_arg", DELTA5, Tag::LoadableValue),

			attr_definition_headers: ByteBand::new("attr_definition_headers"),
			attr_definition_name: RefBand::new("attr_definition_name", UNSIGNED5, Tag::Utf8),
			attr_definition_layout: RefBand::new("attr_definition_layout", UNSIGNED5, Tag::Utf8),

			ic_this_class: RefBand::new("ic_this_class", UDELTA5, Tag::Class),
			ic_flags: IntBand::new("ic_flags", UNSIGNED5),
			ic_outer_class: RefBand::nullable("ic_outer_class", DELTA5, Tag::Class),
			ic_name: RefBand::nullable("ic_name", DELTA5, Tag::Utf8),

			class_this: RefBand::new("class_this", DELTA5, Tag::Class),
			class_super: RefBand::new("class_super", DELTA5, Tag::Class),
			class_interface_count: IntBand::new("class_interface_count", DELTA5),
			class_interface: RefBand::new("class_interface", DELTA5, Tag::Class),
			class_field_count: IntBand::new("class_field_count", DELTA5),
			class_method_count: IntBand::new("class_method_count", DELTA5),
			field_descr: RefBand::new("field_descr", DELTA5, Tag::NameAndType),
			method_descr: RefBand::new("method_descr", MDELTA5, Tag::NameAndType),

			attr: [
				AttrCtxBands::new(Ctx::Class),
				AttrCtxBands::new(Ctx::Field),
				AttrCtxBands::new(Ctx::Method),
				AttrCtxBands::new(Ctx::Code),
			],

			class_inner_classes_n: IntBand::new("class_InnerClasses_N", UNSIGNED5),
			class_inner_classes_rc: RefBand::new("class_InnerClasses_RC", UNSIGNED5, Tag::Class),
			class_inner_classes_f: IntBand::new("class_InnerClasses_F", UNSIGNED5),
			class_inner_classes_outer_rcn: RefBand::nullable("class_InnerClasses_outer_RCN", UNSIGNED5, Tag::Class),
			class_inner_classes_name_run: RefBand::nullable("class_InnerClasses_name_RUN", UNSIGNED5, Tag::Utf8),

			code_headers: ByteBand::new("code_headers"),
			code_max_stack: IntBand::new("code_max_stack", UNSIGNED5),
			code_max_na_locals: IntBand::new("code_max_na_locals", UNSIGNED5),
			code_handler_count: IntBand::new("code_handler_count", UNSIGNED5),
			code_handler_start_p: IntBand::new("code_handler_start_P", BCI5),
			code_handler_end_po: IntBand::new("code_handler_end_PO", BRANCH5),
			code_handler_catch_po: IntBand::new("code_handler_catch_PO", BRANCH5),
			code_handler_class_rcn: RefBand::nullable("code_handler_class_RCN", UNSIGNED5, Tag::Class),

			bc_case_count: IntBand::new("bc_case_count", UNSIGNED5),
			bc_case_value: IntBand::new("bc_case_value", DELTA5),
			bc_byte: ByteBand::new("bc_byte"),
			bc_short: IntBand::new("bc_short", DELTA5),
			bc_local: IntBand::new("bc_local", UNSIGNED5),
			bc_label: IntBand::new("bc_label", BRANCH5),
			bc_intref: RefBand::new("bc_intref", DELTA5, Tag::Int),
			bc_floatref: RefBand::new("bc_floatref", DELTA5, Tag::Float),
			bc_longref: RefBand::new("bc_longref", DELTA5, Tag::Long),
			bc_doubleref: RefBand::new("bc_doubleref", DELTA5, Tag::Double),
			bc_stringref: RefBand::new("bc_stringref", DELTA5, Tag::String),
			bc_loadablevalueref: RefBand::new("bc_loadablevalueref", DELTA5, Tag::LoadableValue),
			bc_classref: RefBand::nullable("bc_classref", UNSIGNED5, Tag::Class),
			bc_fieldref: RefBand::new("bc_fieldref", DELTA5, Tag::Fieldref),
			bc_methodref: RefBand::new("bc_methodref", UNSIGNED5, Tag::Methodref),
			bc_imethodref: RefBand::new("bc_imethodref", DELTA5, Tag::InterfaceMethodref),
			bc_indyref: RefBand::new("bc_indyref", DELTA5, Tag::InvokeDynamic),
			bc_thisfield: RefBand::new("bc_thisfield", UNSIGNED5, Tag::Fieldref),
			bc_superfield: RefBand::new("bc_superfield", UNSIGNED5, Tag::Fieldref),
			bc_thismethod: RefBand::new("bc_thismethod", UNSIGNED5, Tag::Methodref),
			bc_supermethod: RefBand::new("bc_supermethod", UNSIGNED5, Tag::Methodref),
			bc_initref: IntBand::new("bc_initref", UNSIGNED5),
			bc_escref: RefBand::new("bc_escref", UNSIGNED5, Tag::All),
			bc_escrefsize: IntBand::new("bc_escrefsize", UNSIGNED5),
			bc_escsize: IntBand::new("bc_escsize", UNSIGNED5),
			bc_escbyte: ByteBand::new("bc_escbyte"),

			file_name: RefBand::new("file_name", UNSIGNED5, Tag::Utf8),
			file_size_hi: IntBand::new("file_size_hi", UNSIGNED5),
			file_size_lo: IntBand::new("file_size_lo", UNSIGNED5),
			file_modtime: IntBand::new("file_modtime", DELTA5),
			file_options: IntBand::new("file_options", UNSIGNED5),
		}
	}
}

pub struct ArchiveReader<R: Read> {
	pub(crate) input: LimitedBuffer<R>,
	pub(crate) headers: BandHeaders,
	pub(crate) bands: Bands,
	pub(crate) pkg: Package,
	pub(crate) version: (u16, u16),
	pub(crate) archive_options: u32,
	/// Declared byte count from `archive_header_S` to end of stream.
	archive_size: u64,
	/// Bytes served when the declared region began.
	archive_size_base: u64,
	band_headers_size: usize,
	num_attr_defs: usize,
	pub(crate) num_files: usize,
	num_inner_classes: usize,
	pub(crate) num_classes: usize,
	tag_counts: HashMap<Tag, usize>,
	pub(crate) attr_defs: Option<AttrDefs>,
	/// Archive-order element bands per attribute layout.
	pub(crate) elem_bands: HashMap<LayoutHandle, Vec<ElemBand>>,
	/// Erased-Utf8 spelling to signature entry, for the output ordering.
	pub(crate) utf8_signatures: HashMap<EntryRef, EntryRef>,
	/// `(class, method)` of every code holder, in archive order.
	pub(crate) codes: Vec<(usize, usize)>,
	/// Codes carrying attribute flags: all of them, or only long-header
	/// ones, per `AO_HAVE_ALL_CODE_FLAGS`.
	pub(crate) codes_with_flags: Vec<usize>,
	/// Narrow `ldc` referents per class index.
	pub(crate) ldc_refs: HashMap<usize, IndexSet<EntryRef>>,
}

/// Reads a whole archive into a package.
pub fn read_package(input: impl Read) -> Result<Package> {
	let mut reader = ArchiveReader::new(input);
	match reader.read() {
		Ok(()) => Ok(reader.pkg),
		Err(e) => {
			let (served, buffered, limit) = reader.input.offsets();
			warn!("error on input: {e}");
			Err(e.context(anyhow!(
				"stream offsets: served={served} buffered={buffered} limit={limit:?}"
			)))
		}
	}
}

impl<R: Read> ArchiveReader<R> {
	pub fn new(input: R) -> ArchiveReader<R> {
		ArchiveReader {
			input: LimitedBuffer::new(input),
			headers: BandHeaders::default(),
			bands: Bands::new(),
			pkg: Package::new(),
			version: (0, 0),
			archive_options: 0,
			archive_size: 0,
			archive_size_base: 0,
			band_headers_size: 0,
			num_attr_defs: 0,
			num_files: 0,
			num_inner_classes: 0,
			num_classes: 0,
			tag_counts: HashMap::new(),
			attr_defs: None,
			elem_bands: HashMap::new(),
			utf8_signatures: HashMap::new(),
			codes: Vec::new(),
			codes_with_flags: Vec::new(),
			ldc_refs: HashMap::new(),
		}
	}

	pub(crate) fn attr_defs(&self) -> &AttrDefs {
		self.attr_defs.as_ref().expect("attribute defs initialized with the header")
	}

	pub(crate) fn test_option(&self, bit: u32) -> bool {
		self.archive_options & bit != 0
	}

	pub(crate) fn have_flags_hi(&self, ctx: Ctx) -> bool {
		self.test_option(1 << (LG_AO_HAVE_XXX_FLAGS_HI + ctx as u32))
	}

	pub(crate) fn tag_count(&self, tag: Tag) -> usize {
		self.tag_counts.get(&tag).copied().unwrap_or(0)
	}

	fn read(&mut self) -> Result<()> {
		self.read_file_header()?;
		self.read_band_headers()?;
		self.read_constant_pool()?;
		self.read_attr_defs()?;
		self.read_inner_classes()?;
		self.read_classes()?;
		self.read_byte_codes()?;
		self.read_files()?;
		// As a post-pass, build local constant pools and inner classes.
		for i in 0..self.pkg.classes.len() {
			self.reconstruct_class(i)?;
		}
		Ok(())
	}

	fn read_file_header(&mut self) -> Result<()> {
		self.read_archive_magic()?;
		self.read_archive_header()
	}

	fn read_archive_magic(&mut self) -> Result<()> {
		// Read a minimum of bytes in the first gulp.
		self.input.set_read_limit(Some((MAGIC_BYTES + AH_LENGTH_MIN) as u64));

		self.bands.archive_magic.expect_length(MAGIC_BYTES);
		self.bands.archive_magic.read_from(&mut self.input, &mut self.headers)?;
		let mut magic: u32 = 0;
		for _ in 0..MAGIC_BYTES {
			magic = (magic << 8) | self.bands.archive_magic.get_byte()? as u32;
		}
		if magic != ARCHIVE_MAGIC {
			bail!(UnpackError::MagicMismatch { got: magic, expected: ARCHIVE_MAGIC });
		}
		self.bands.archive_magic.done_disbursing()
	}

	fn check_archive_version(&self) -> Result<()> {
		if !archive_version::ALL.contains(&self.version) {
			bail!(UnpackError::UnsupportedVersion {
				major: self.version.0,
				minor: self.version.1,
			});
		}
		Ok(())
	}

	pub(crate) fn check_legacy(&self, band: &'static str) -> Result<()> {
		if self.version < archive_version::JAVA7 {
			bail!(UnpackError::LegacyFeatureInOldVersion { band });
		}
		Ok(())
	}

	fn read_archive_header(&mut self) -> Result<()> {
		let b = &mut self.bands.archive_header_0;
		b.expect_length(AH_LENGTH_0);
		b.read_from(&mut self.input, &mut self.headers)?;
		let minver = b.get_int()? as u16;
		let majver = b.get_int()? as u16;
		self.version = (majver, minver);
		self.check_archive_version()?;
		self.archive_options = self.bands.archive_header_0.get_int()? as u32;
		self.bands.archive_header_0.done_disbursing()?;
		if self.archive_options & AO_UNUSED_MBZ != 0 {
			bail!("reserved archive option bits are set: {:#x}", self.archive_options);
		}

		let have_special = self.test_option(AO_HAVE_SPECIAL_FORMATS);
		let have_files = self.test_option(AO_HAVE_FILE_HEADERS);
		let have_numbers = self.test_option(AO_HAVE_CP_NUMBERS);
		let have_cp_extra = self.test_option(AO_HAVE_CP_EXTRAS);

		let hi = [Ctx::Class, Ctx::Field, Ctx::Method, Ctx::Code].map(|c| self.have_flags_hi(c));
		self.attr_defs = Some(AttrDefs::new(&mut self.pkg.pool, hi)?);

		self.bands.archive_header_s.expect_length(if have_files { AH_LENGTH_S } else { 0 });
		self.bands.archive_header_s.read_from(&mut self.input, &mut self.headers)?;
		if have_files {
			let size_hi = self.bands.archive_header_s.get_int()? as u32 as u64;
			let size_lo = self.bands.archive_header_s.get_int()? as u32 as u64;
			self.archive_size = (size_hi << 32) + size_lo;
			// Bound everything up to the file_bits.
			self.input.set_read_limit(Some(self.archive_size));
		} else {
			self.archive_size = 0;
			self.input.set_read_limit(None);
		}
		self.bands.archive_header_s.done_disbursing()?;
		self.archive_size_base = self.input.bytes_served();

		let mut remaining = AH_LENGTH_MIN - AH_LENGTH_0 - AH_LENGTH_S;
		if have_files {
			remaining += AH_FILE_HEADER_LEN;
		}
		if have_special {
			remaining += AH_SPECIAL_FORMAT_LEN;
		}
		if have_numbers {
			remaining += AH_CP_NUMBER_LEN;
		}
		if have_cp_extra {
			remaining += AH_CP_EXTRA_LEN;
		}
		self.bands.archive_header_1.expect_length(remaining);
		self.bands.archive_header_1.read_from(&mut self.input, &mut self.headers)?;

		if have_files {
			// archive_next_count is reserved; read and ignore it
			let _next_count = self.bands.archive_header_1.get_int()?;
			self.pkg.default_modtime = self.bands.archive_header_1.get_int()?;
			self.num_files = self.bands.archive_header_1.get_len()?;
		}

		if have_special {
			self.band_headers_size = self.bands.archive_header_1.get_len()?;
			self.num_attr_defs = self.bands.archive_header_1.get_len()?;
		}

		for tag in Tag::IN_ORDER {
			if tag.is_number() && !have_numbers {
				continue;
			}
			if tag.is_extra() && !have_cp_extra {
				continue;
			}
			let count = self.bands.archive_header_1.get_len()?;
			self.tag_counts.insert(tag, count);
		}

		self.num_inner_classes = self.bands.archive_header_1.get_len()?;
		let minver = self.bands.archive_header_1.get_int()? as u16;
		let majver = self.bands.archive_header_1.get_int()? as u16;
		self.pkg.default_class_version = (majver, minver);
		self.num_classes = self.bands.archive_header_1.get_len()?;
		self.bands.archive_header_1.done_disbursing()?;

		info!(
			"reading archive version {}.{}: {} classes, {} files",
			self.version.0, self.version.1, self.num_classes, self.num_files
		);

		if self.test_option(AO_DEFLATE_HINT) {
			self.pkg.default_file_options |= crate::constants::file_options::FO_DEFLATE_HINT;
		}
		Ok(())
	}

	fn read_band_headers(&mut self) -> Result<()> {
		self.bands.band_headers.expect_length(self.band_headers_size);
		self.bands.band_headers.read_from(&mut self.input, &mut self.headers)?;
		let mut bytes = Vec::with_capacity(self.band_headers_size);
		for _ in 0..self.band_headers_size {
			bytes.push(self.bands.band_headers.get_byte()?);
		}
		self.bands.band_headers.done_disbursing()?;
		self.headers = BandHeaders::new(bytes);
		Ok(())
	}

	fn read_attr_defs(&mut self) -> Result<()> {
		let n = self.num_attr_defs;
		self.bands.attr_definition_headers.expect_length(n);
		self.bands.attr_definition_name.expect_length(n);
		self.bands.attr_definition_layout.expect_length(n);
		self.bands.attr_definition_headers.read_from(&mut self.input, &mut self.headers)?;
		self.bands.attr_definition_name.read_from(&mut self.input, &mut self.headers)?;
		self.bands.attr_definition_layout.read_from(&mut self.input, &mut self.headers)?;
		for _ in 0..n {
			let header = self.bands.attr_definition_headers.get_byte()?;
			let name_ref = self.bands.attr_definition_name.get_ref(&self.pkg.pool)?;
			let layout_ref = self.bands.attr_definition_layout.get_ref(&self.pkg.pool)?;
			let ctx = match header & ADH_CONTEXT_MASK {
				0 => Ctx::Class,
				1 => Ctx::Field,
				2 => Ctx::Method,
				_ => Ctx::Code,
			};
			let index = (header >> ADH_BIT_SHIFT) as i32 - ADH_BIT_IS_LSB;
			let name = self.pkg.pool.utf8_text(name_ref)?.to_owned();
			let layout_text = self.pkg.pool.utf8_text(layout_ref)?;
			let layout: String = std::str::from_utf8(layout_text.as_bytes())
				.map(str::to_owned)
				.map_err(|_| UnpackError::BadLayout { layout: layout_text.to_string() })?;
			debug!("defining {} attribute {} at index {}", ctx.name(), name, index);
			let defs = self.attr_defs.as_mut().expect("defs exist");
			defs.define_from_archive(&mut self.pkg.pool, ctx, index, name, &layout)?;
		}
		self.bands.attr_definition_headers.done_disbursing()?;
		self.bands.attr_definition_name.done_disbursing()?;
		self.bands.attr_definition_layout.done_disbursing()?;
		Ok(())
	}

	fn read_inner_classes(&mut self) -> Result<()> {
		let n = self.num_inner_classes;
		self.bands.ic_this_class.expect_length(n);
		self.bands.ic_this_class.read_from(&mut self.input, &mut self.headers)?;
		self.bands.ic_flags.expect_length(n);
		self.bands.ic_flags.read_from(&mut self.input, &mut self.headers)?;
		let mut long_ic_count = 0;
		for _ in 0..n {
			let flags = self.bands.ic_flags.get_int()? as u32;
			if flags & ACC_IC_LONG_FORM != 0 {
				long_ic_count += 1;
			}
		}
		self.bands.ic_outer_class.expect_length(long_ic_count);
		self.bands.ic_outer_class.read_from(&mut self.input, &mut self.headers)?;
		self.bands.ic_name.expect_length(long_ic_count);
		self.bands.ic_name.read_from(&mut self.input, &mut self.headers)?;
		self.bands.ic_flags.reset_for_second_pass();
		let mut ics = Vec::with_capacity(n);
		for _ in 0..n {
			let mut flags = self.bands.ic_flags.get_int()? as u32;
			let long_form = flags & ACC_IC_LONG_FORM != 0;
			flags &= !ACC_IC_LONG_FORM;
			let this_class = self.bands.ic_this_class.get_ref(&self.pkg.pool)?;
			let (outer_class, name) = if long_form {
				(
					self.bands.ic_outer_class.get_ref_opt(&self.pkg.pool)?,
					self.bands.ic_name.get_ref_opt(&self.pkg.pool)?,
				)
			} else {
				let class_name = self.pkg.pool.class_name(this_class)?;
				let parsed = crate::tree::class::parse_inner_class_name(class_name)
					.ok_or_else(|| {
						anyhow!("unpredictable inner class {} needs a long tuple", class_name)
					})?;
				let (outer, _number, simple) = parsed;
				let outer_class = outer.map(|o| self.pkg.pool.class_named(o));
				let name = simple.map(|s| self.pkg.pool.utf8(s));
				(outer_class, name)
			};
			ics.push(InnerClass { this_class, outer_class, name, flags });
		}
		self.bands.ic_this_class.done_disbursing()?;
		self.bands.ic_flags.done_disbursing()?;
		self.bands.ic_outer_class.done_disbursing()?;
		self.bands.ic_name.done_disbursing()?;
		self.pkg.set_all_inner_classes(ics);
		Ok(())
	}

	/// Checks the declared archive size against the bytes actually served,
	/// once the trailing file bits have been consumed.
	pub(crate) fn check_archive_size(&self) -> Result<()> {
		if self.archive_size != 0 && !self.input.at_limit() {
			bail!(UnpackError::SizeMismatch {
				expected: self.archive_size,
				served: self.input.bytes_served() - self.archive_size_base,
			});
		}
		Ok(())
	}
}
