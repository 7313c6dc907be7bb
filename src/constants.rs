//! Constants of the archive format: magic numbers, option bits, constant
//! pool tags, attribute contexts and the bytecode-level pseudo opcodes.

/// First four bytes of every archive.
pub const ARCHIVE_MAGIC: u32 = 0xCAFED00D;

/// Archive format versions, as `(major, minor)` pairs.
pub mod archive_version {
	/// Shipped with Java 5 ("5.0").
	pub const JAVA5: (u16, u16) = (150, 7);
	/// Shipped with Java 6 ("6.0").
	pub const JAVA6: (u16, u16) = (160, 1);
	/// Shipped with Java 7 ("7.0"); first version with `cp_MethodHandle` and friends.
	pub const JAVA7: (u16, u16) = (170, 1);
	/// Shipped with Java 8 ("8.0").
	pub const JAVA8: (u16, u16) = (171, 0);

	pub const ALL: [(u16, u16); 4] = [JAVA8, JAVA7, JAVA6, JAVA5];
}

/// Highest class file version whose attribute layouts we accept.
pub const HIGHEST_CLASS_VERSION: (u16, u16) = (51, 0);

/// Bits of `#archive_options`.
pub mod archive_options {
	pub const AO_HAVE_SPECIAL_FORMATS: u32 = 1 << 0;
	pub const AO_HAVE_CP_NUMBERS: u32 = 1 << 1;
	pub const AO_HAVE_ALL_CODE_FLAGS: u32 = 1 << 2;
	pub const AO_HAVE_CP_EXTRAS: u32 = 1 << 3;
	pub const AO_HAVE_FILE_HEADERS: u32 = 1 << 4;
	pub const AO_DEFLATE_HINT: u32 = 1 << 5;
	pub const AO_HAVE_FILE_MODTIME: u32 = 1 << 6;
	pub const AO_HAVE_FILE_OPTIONS: u32 = 1 << 7;
	pub const AO_HAVE_FILE_SIZE_HI: u32 = 1 << 8;
	/// Shift of the per-context `AO_HAVE_XXX_FLAGS_HI` bits; add the
	/// attribute context ordinal to get the concrete bit.
	pub const LG_AO_HAVE_XXX_FLAGS_HI: u32 = 9;
	pub const AO_HAVE_CLASS_FLAGS_HI: u32 = 1 << 9;
	pub const AO_HAVE_FIELD_FLAGS_HI: u32 = 1 << 10;
	pub const AO_HAVE_METHOD_FLAGS_HI: u32 = 1 << 11;
	pub const AO_HAVE_CODE_FLAGS_HI: u32 = 1 << 12;
	/// All bits above this set must be zero.
	pub const AO_UNUSED_MBZ: u32 = !((1 << 13) - 1);
}

/// Bits of the per-file `file_options` word.
pub mod file_options {
	pub const FO_DEFLATE_HINT: u32 = 1 << 0;
	pub const FO_IS_CLASS_STUB: u32 = 1 << 1;
}

/// Marker bit distinguishing long-form inner class tuples.
pub const ACC_IC_LONG_FORM: u32 = 1 << 16;

/// Fixed scalar counts in the archive header bands.
pub mod header_len {
	/// minver, majver, options.
	pub const AH_LENGTH_0: usize = 3;
	/// size_hi, size_lo.
	pub const AH_LENGTH_S: usize = 2;
	/// Unconditional header values: `AH_LENGTH_0` + `AH_LENGTH_S` + 8 basic
	/// cp counts + ic count + default class minver/majver + class count.
	pub const AH_LENGTH_MIN: usize = 17;
	/// next_count, default modtime, file count.
	pub const AH_FILE_HEADER_LEN: usize = 3;
	/// band_headers size, attr definition count.
	pub const AH_SPECIAL_FORMAT_LEN: usize = 2;
	/// Int, Float, Long, Double counts.
	pub const AH_CP_NUMBER_LEN: usize = 4;
	/// MethodHandle, MethodType, InvokeDynamic, BootstrapMethod counts.
	pub const AH_CP_EXTRA_LEN: usize = 4;
	pub const MAGIC_BYTES: usize = 4;
}

/// Constant pool tags. The numeric values below 19 match the class file
/// format; `SIGNATURE` and `BOOTSTRAP_METHOD` exist only inside archives,
/// and the "group" tags name unions of several real tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Tag {
	Utf8 = 1,
	Int = 3,
	Float = 4,
	Long = 5,
	Double = 6,
	Class = 7,
	String = 8,
	Fieldref = 9,
	Methodref = 10,
	InterfaceMethodref = 11,
	NameAndType = 12,
	Signature = 13,
	MethodHandle = 15,
	MethodType = 16,
	BootstrapMethod = 17,
	InvokeDynamic = 18,
	// group pseudo-tags
	All = 50,
	LoadableValue = 51,
	AnyMember = 52,
}

impl Tag {
	/// The order in which the per-tag pools appear in the archive. Counts in
	/// the archive header and the `cp_bands` group both follow it.
	pub const IN_ORDER: [Tag; 16] = [
		Tag::Utf8,
		Tag::Int,
		Tag::Float,
		Tag::Long,
		Tag::Double,
		Tag::String,
		Tag::Class,
		Tag::Signature,
		Tag::NameAndType,
		Tag::Fieldref,
		Tag::Methodref,
		Tag::InterfaceMethodref,
		Tag::MethodHandle,
		Tag::MethodType,
		Tag::InvokeDynamic,
		Tag::BootstrapMethod,
	];

	/// Tags whose counts are only present under `AO_HAVE_CP_NUMBERS`.
	pub fn is_number(self) -> bool {
		matches!(self, Tag::Int | Tag::Float | Tag::Long | Tag::Double)
	}

	/// Tags whose counts are only present under `AO_HAVE_CP_EXTRAS`;
	/// these appeared in archive version 7.0.
	pub fn is_extra(self) -> bool {
		matches!(
			self,
			Tag::MethodHandle | Tag::MethodType | Tag::InvokeDynamic | Tag::BootstrapMethod
		)
	}

	/// Member tags of a group pseudo-tag, in the order their pools are
	/// concatenated when a band resolves against the group.
	pub fn group_members(self) -> Option<&'static [Tag]> {
		match self {
			Tag::All => Some(&Tag::IN_ORDER),
			Tag::LoadableValue => Some(&[
				Tag::Int,
				Tag::Float,
				Tag::Long,
				Tag::Double,
				Tag::String,
				Tag::Class,
				Tag::MethodHandle,
				Tag::MethodType,
			]),
			Tag::AnyMember => Some(&[Tag::Fieldref, Tag::Methodref, Tag::InterfaceMethodref]),
			_ => None,
		}
	}

	pub fn name(self) -> &'static str {
		match self {
			Tag::Utf8 => "Utf8",
			Tag::Int => "Int",
			Tag::Float => "Float",
			Tag::Long => "Long",
			Tag::Double => "Double",
			Tag::Class => "Class",
			Tag::String => "String",
			Tag::Fieldref => "Field",
			Tag::Methodref => "Method",
			Tag::InterfaceMethodref => "Imethod",
			Tag::NameAndType => "Descr",
			Tag::Signature => "Signature",
			Tag::MethodHandle => "MethodHandle",
			Tag::MethodType => "MethodType",
			Tag::BootstrapMethod => "BootstrapMethod",
			Tag::InvokeDynamic => "InvokeDynamic",
			Tag::All => "All",
			Tag::LoadableValue => "LoadableValue",
			Tag::AnyMember => "AnyMember",
		}
	}
}

/// Attribute holder contexts, in numeric order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Ctx {
	Class = 0,
	Field = 1,
	Method = 2,
	Code = 3,
}

impl Ctx {
	pub const ALL: [Ctx; 4] = [Ctx::Class, Ctx::Field, Ctx::Method, Ctx::Code];

	pub fn name(self) -> &'static str {
		match self {
			Ctx::Class => "class",
			Ctx::Field => "field",
			Ctx::Method => "method",
			Ctx::Code => "code",
		}
	}
}

/// The flag bit reserved in every context to mean "this holder also has
/// explicitly counted attributes in `attr_count`/`attr_indexes`".
pub const ATTR_OVERFLOW_BIT: u32 = 16;

/// `attr_definition_headers` byte: low two bits are the context, the rest
/// is the flag index biased by one.
pub const ADH_CONTEXT_MASK: u8 = 0x3;
pub const ADH_BIT_SHIFT: u8 = 2;
pub const ADH_BIT_IS_LSB: i32 = 1;

/// Standard JVM opcodes needed by name. The decoder works off the format
/// tables in [`crate::instruction`]; only opcodes the reader mentions
/// explicitly are named here.
pub mod opcode {
	pub const NOP: u8 = 0;
	pub const DCONST_1: u8 = 15;
	pub const BIPUSH: u8 = 16;
	pub const SIPUSH: u8 = 17;
	pub const LDC: u8 = 18;
	pub const LDC_W: u8 = 19;
	pub const LDC2_W: u8 = 20;
	pub const ILOAD: u8 = 21;
	pub const ALOAD: u8 = 25;
	pub const ILOAD_0: u8 = 26;
	pub const ALOAD_0: u8 = 42;
	pub const SALOAD: u8 = 53;
	pub const ISTORE: u8 = 54;
	pub const ASTORE: u8 = 58;
	pub const ISTORE_0: u8 = 59;
	pub const LXOR: u8 = 131;
	pub const IINC: u8 = 132;
	pub const I2L: u8 = 133;
	pub const DCMPG: u8 = 152;
	pub const IFEQ: u8 = 153;
	pub const JSR: u8 = 168;
	pub const RET: u8 = 169;
	pub const TABLESWITCH: u8 = 170;
	pub const LOOKUPSWITCH: u8 = 171;
	pub const IRETURN: u8 = 172;
	pub const RETURN: u8 = 177;
	pub const GETSTATIC: u8 = 178;
	pub const PUTSTATIC: u8 = 179;
	pub const GETFIELD: u8 = 180;
	pub const PUTFIELD: u8 = 181;
	pub const INVOKEVIRTUAL: u8 = 182;
	pub const INVOKESPECIAL: u8 = 183;
	pub const INVOKESTATIC: u8 = 184;
	pub const INVOKEINTERFACE: u8 = 185;
	pub const INVOKEDYNAMIC: u8 = 186;
	pub const NEW: u8 = 187;
	pub const NEWARRAY: u8 = 188;
	pub const ANEWARRAY: u8 = 189;
	pub const ARRAYLENGTH: u8 = 190;
	pub const ATHROW: u8 = 191;
	pub const CHECKCAST: u8 = 192;
	pub const INSTANCEOF: u8 = 193;
	pub const MONITORENTER: u8 = 194;
	pub const MONITOREXIT: u8 = 195;
	pub const WIDE: u8 = 196;
	pub const MULTIANEWARRAY: u8 = 197;
	pub const IFNULL: u8 = 198;
	pub const IFNONNULL: u8 = 199;
	pub const GOTO_W: u8 = 200;
	pub const JSR_W: u8 = 201;
}

/// Pseudo opcodes used only inside `bc_codes`. They share the 0..=255
/// space with the standard opcodes, starting right past `_jsr_w`.
pub mod pseudo_op {
	use super::opcode;

	/// First value that is not a standard JVM opcode.
	pub const BYTECODE_LIMIT: u16 = 202;

	/// End of one method's opcode stream.
	pub const END_MARKER: u16 = 255;
	/// Inline raw bytes; length from `bc_escsize`, bytes from `bc_escbyte`.
	pub const BYTE_ESCAPE: u16 = 254;
	/// Inline raw constant pool reference from `bc_escref`.
	pub const REF_ESCAPE: u16 = 253;

	/// The seven "linker" opcodes `getstatic..invokestatic` have packed
	/// self-referent forms.
	pub const FIRST_LINKER_OP: u16 = opcode::GETSTATIC as u16;
	pub const LAST_LINKER_OP: u16 = opcode::INVOKESTATIC as u16;
	pub const NUM_LINKER_OPS: u16 = LAST_LINKER_OP - FIRST_LINKER_OP + 1;

	pub const SELF_LINKER_OP: u16 = BYTECODE_LIMIT;
	pub const SELF_LINKER_ALOAD_FLAG: u16 = NUM_LINKER_OPS;
	pub const SELF_LINKER_SUPER_FLAG: u16 = 2 * NUM_LINKER_OPS;
	pub const SELF_LINKER_LIMIT: u16 = SELF_LINKER_OP + 4 * NUM_LINKER_OPS;

	/// `invokespecial` of the n-th `<init>` overloading of this, super, or
	/// the most recently allocated class.
	pub const INVOKEINIT_OP: u16 = SELF_LINKER_LIMIT;
	pub const INVOKEINIT_SELF_OPTION: u16 = 0;
	pub const INVOKEINIT_SUPER_OPTION: u16 = 1;
	pub const INVOKEINIT_NEW_OPTION: u16 = 2;
	pub const INVOKEINIT_LIMIT: u16 = INVOKEINIT_OP + 3;

	/// Typed `ldc` flavors. `sldc`/`sldc_w`/`lldc2_w` reuse the standard
	/// `ldc`/`ldc_w`/`ldc2_w` byte values.
	pub const XLDC_OP: u16 = INVOKEINIT_LIMIT;
	pub const SLDC: u16 = opcode::LDC as u16;
	pub const CLDC: u16 = XLDC_OP;
	pub const ILDC: u16 = XLDC_OP + 1;
	pub const FLDC: u16 = XLDC_OP + 2;
	pub const SLDC_W: u16 = opcode::LDC_W as u16;
	pub const CLDC_W: u16 = XLDC_OP + 3;
	pub const ILDC_W: u16 = XLDC_OP + 4;
	pub const FLDC_W: u16 = XLDC_OP + 5;
	pub const LLDC2_W: u16 = opcode::LDC2_W as u16;
	pub const DLDC2_W: u16 = XLDC_OP + 6;
	pub const QLDC: u16 = XLDC_OP + 7;
	pub const QLDC_W: u16 = XLDC_OP + 8;
	pub const XLDC_LIMIT: u16 = XLDC_OP + 9;

	/// `invokespecial`/`invokestatic` carrying an `InterfaceMethodref`.
	pub const INVOKE_INT_OP: u16 = XLDC_LIMIT;
	pub const INVOKESPECIAL_INT: u16 = INVOKE_INT_OP;
	pub const INVOKESTATIC_INT: u16 = INVOKE_INT_OP + 1;
	pub const INVOKE_INT_LIMIT: u16 = INVOKE_INT_OP + 2;
}

#[cfg(test)]
mod testing {
	use super::pseudo_op::*;

	#[test]
	fn pseudo_opcodes_fit_one_byte() {
		assert_eq!(SELF_LINKER_LIMIT, 230);
		assert_eq!(INVOKEINIT_LIMIT, 233);
		assert_eq!(XLDC_LIMIT, 242);
		assert_eq!(INVOKE_INT_LIMIT, 244);
		assert!(INVOKE_INT_LIMIT < REF_ESCAPE);
	}
}
