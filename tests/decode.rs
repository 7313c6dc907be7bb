//! End-to-end decoding of small synthesized archives.
//!
//! The helper below is a miniature band writer: enough of the coded
//! integer format to lay out archives byte by byte, never part of the
//! crate itself.

use anyhow::Result;
use pretty_assertions::assert_eq;

use unpack200::coding::{Coding, BYTE1, CHAR3, DELTA5, MDELTA5, UDELTA5, UNSIGNED5};
use unpack200::constants::{opcode, Tag};
use unpack200::pool::Entry;
use unpack200::{read_package_bytes, UnpackError};

fn push_coded(out: &mut Vec<u8>, c: Coding, mut z: u64) {
	let l = 256 - c.h as u64;
	for i in 0..c.b {
		if z < l || i == c.b - 1 {
			assert!(z <= 255, "value too wide for one terminal byte");
			out.push(z as u8);
			return;
		}
		let x = l + (z - l) % c.h as u64;
		out.push(x as u8);
		z = (z - x) / c.h as u64;
	}
}

/// Encodes absolute values through a coding: delta first, then the sign
/// transform, then the variable-length bytes.
fn push_band(out: &mut Vec<u8>, c: Coding, values: &[i64]) {
	let mut prev = 0i64;
	for &v in values {
		let raw = if c.is_delta() {
			let d = v - prev;
			prev = v;
			d
		} else {
			v
		};
		let z = match c.s {
			0 => {
				assert!(raw >= 0, "unsigned coding cannot carry {raw}");
				raw as u64
			}
			1 => {
				if raw >= 0 {
					(raw as u64) << 1
				} else {
					((-raw) as u64 * 2) - 1
				}
			}
			2 => {
				if raw >= 0 {
					4 * (raw as u64 / 3) + raw as u64 % 3
				} else {
					((-raw) as u64 - 1) * 4 + 3
				}
			}
			_ => unreachable!(),
		};
		push_coded(out, c, z);
	}
}

fn push_chars(out: &mut Vec<u8>, s: &str) {
	let units: Vec<i64> = s.encode_utf16().map(|u| u as i64).collect();
	push_band(out, CHAR3, &units);
}

const MAGIC: [u8; 4] = [0xca, 0xfe, 0xd0, 0x0d];
const AO_HAVE_SPECIAL_FORMATS: i64 = 1 << 0;
const AO_HAVE_FILE_HEADERS: i64 = 1 << 4;

/// magic, minver, majver, options.
fn header_0(options: i64) -> Vec<u8> {
	let mut out = MAGIC.to_vec();
	push_band(&mut out, UNSIGNED5, &[1, 170, options]);
	out
}

#[test]
fn minimal_empty_archive() -> Result<()> {
	let mut bytes = header_0(0);
	// eight basic cp counts, ic count, default class version, class count
	push_band(&mut bytes, UNSIGNED5, &[0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 52, 0]);

	let pkg = read_package_bytes(&bytes)?;
	assert_eq!(pkg.classes.len(), 0);
	assert_eq!(pkg.files.len(), 0);
	assert_eq!(pkg.default_class_version, (52, 0));
	Ok(())
}

#[test]
fn bad_magic_is_rejected() {
	let err = read_package_bytes(&[0xca, 0xfe, 0xba, 0xbe, 0, 0, 0]).unwrap_err();
	assert!(matches!(
		err.downcast_ref::<UnpackError>(),
		Some(UnpackError::MagicMismatch { got: 0xcafebabe, .. })
	));
}

#[test]
fn unknown_version_is_rejected() {
	let mut bytes = MAGIC.to_vec();
	push_band(&mut bytes, UNSIGNED5, &[9, 144, 0]);
	let err = read_package_bytes(&bytes).unwrap_err();
	assert!(matches!(
		err.downcast_ref::<UnpackError>(),
		Some(UnpackError::UnsupportedVersion { major: 144, minor: 9 })
	));
}

#[test]
fn truncated_header_is_rejected() {
	let err = read_package_bytes(&MAGIC).unwrap_err();
	assert!(matches!(
		err.downcast_ref::<UnpackError>(),
		Some(UnpackError::TruncatedStream)
	));
}

/// One class `A extends java/lang/Object`, no members, no files.
fn single_class_archive() -> Vec<u8> {
	let mut bytes = header_0(0);
	// cp counts: Utf8=3, String=0, Class=2, the rest zero; ic count 0;
	// default class version 52.0; one class
	push_band(&mut bytes, UNSIGNED5, &[3, 0, 2, 0, 0, 0, 0, 0, 0, 0, 52, 1]);
	// cp_Utf8: "", "A", "java/lang/Object"
	push_band(&mut bytes, DELTA5, &[0]); // prefix of str[2] against "A"
	push_band(&mut bytes, UNSIGNED5, &[1, 16]); // suffix lengths
	push_chars(&mut bytes, "A");
	push_chars(&mut bytes, "java/lang/Object");
	// cp_Class: "A", "java/lang/Object"
	push_band(&mut bytes, UDELTA5, &[1, 2]);
	// class_this, class_super, class_interface_count
	push_band(&mut bytes, DELTA5, &[0]);
	push_band(&mut bytes, DELTA5, &[1]);
	push_band(&mut bytes, DELTA5, &[0]);
	// class_field_count, class_method_count
	push_band(&mut bytes, DELTA5, &[0]);
	push_band(&mut bytes, DELTA5, &[0]);
	// class_flags_lo: ACC_SUPER only, no attributes
	push_band(&mut bytes, UNSIGNED5, &[0x20]);
	bytes
}

#[test]
fn single_class() -> Result<()> {
	let pkg = read_package_bytes(&single_class_archive())?;
	assert_eq!(pkg.classes.len(), 1);
	let cls = &pkg.classes[0];
	assert_eq!(pkg.pool.class_name(cls.this_class)?, "A");
	let sup = cls.super_class.expect("has a super class");
	assert_eq!(pkg.pool.class_name(sup)?, "java/lang/Object");
	assert_eq!(cls.flags, 0x20);
	assert_eq!(cls.version, (52, 0));

	// a synthesized stub file is pinned to the class
	let file = &pkg.files[cls.file.expect("file bound")];
	assert_eq!(pkg.pool.utf8_text(file.name)?, "A.class");
	assert!(file.bytes.is_empty());

	// the local pool resolves completely, slot 0 unused
	assert_eq!(cls.local_cp[0], None);
	let spellings: Vec<String> = cls
		.local_cp[1..]
		.iter()
		.map(|e| pkg.pool.describe(e.expect("no double words here")))
		.collect();
	assert!(spellings.contains(&"A".to_string()));
	assert!(spellings.contains(&"java/lang/Object".to_string()));
	Ok(())
}

#[test]
fn super_equal_to_this_means_no_super() -> Result<()> {
	let mut bytes = header_0(0);
	push_band(&mut bytes, UNSIGNED5, &[2, 0, 1, 0, 0, 0, 0, 0, 0, 0, 52, 1]);
	// cp_Utf8: "", "A"
	push_band(&mut bytes, UNSIGNED5, &[1]); // suffix only; prefix band is empty
	push_chars(&mut bytes, "A");
	// cp_Class: "A"
	push_band(&mut bytes, UDELTA5, &[1]);
	// class_this = class_super = A
	push_band(&mut bytes, DELTA5, &[0]);
	push_band(&mut bytes, DELTA5, &[0]);
	push_band(&mut bytes, DELTA5, &[0]);
	push_band(&mut bytes, DELTA5, &[0]);
	push_band(&mut bytes, DELTA5, &[0]);
	push_band(&mut bytes, UNSIGNED5, &[0]);
	let pkg = read_package_bytes(&bytes)?;
	assert_eq!(pkg.classes[0].super_class, None);
	Ok(())
}

/// A non-BMP string travels through the big-suffix escape: the suffix
/// length is zero and the characters get their own band.
#[test]
fn utf8_big_suffix() -> Result<()> {
	let mut bytes = header_0(0);
	push_band(&mut bytes, UNSIGNED5, &[2, 0, 0, 0, 0, 0, 0, 0, 0, 0, 52, 0]);
	// cp_Utf8: "", "\u{1f600}"
	push_band(&mut bytes, UNSIGNED5, &[0]); // suffix 0: big suffix escape
	// no chars in cp_Utf8_chars; the big suffix band says two units
	push_band(&mut bytes, DELTA5, &[2]);
	let units: Vec<i64> = "\u{1f600}".encode_utf16().map(|u| u as i64).collect();
	push_band(&mut bytes, DELTA5, &units); // (Utf8_big_1)

	let pkg = read_package_bytes(&bytes)?;
	let utf8 = pkg.pool.tag_index(Tag::Utf8);
	assert_eq!(utf8.len(), 2);
	assert_eq!(pkg.pool.utf8_text(utf8[0])?, "");
	assert_eq!(pkg.pool.utf8_text(utf8[1])?, "\u{1f600}");
	Ok(())
}

/// One method with a `return` body: the Code attribute is claimed by a
/// flag bit, the short code header carries the frame sizes, and the
/// opcode stream ends at the end marker.
#[test]
fn method_with_code() -> Result<()> {
	let mut bytes = header_0(0);
	// Utf8=4, Class=2, Signature=1, Descr=1; one class
	push_band(&mut bytes, UNSIGNED5, &[4, 0, 2, 1, 1, 0, 0, 0, 0, 0, 52, 1]);
	// cp_Utf8: "", "()V", "A", "java/lang/Object"
	push_band(&mut bytes, DELTA5, &[0, 0]); // prefixes of strings 2..3
	push_band(&mut bytes, UNSIGNED5, &[3, 1, 16]); // suffixes of strings 1..3
	push_chars(&mut bytes, "()V");
	push_chars(&mut bytes, "A");
	push_chars(&mut bytes, "java/lang/Object");
	// cp_Class: "A" (utf8 2), "java/lang/Object" (utf8 3)
	push_band(&mut bytes, UDELTA5, &[2, 3]);
	// cp_Signature: form "()V" (utf8 1), no class parts
	push_band(&mut bytes, DELTA5, &[1]);
	// cp_Descr: the method "A":()V, reusing the class name as its name
	push_band(&mut bytes, UDELTA5, &[2]);
	push_band(&mut bytes, DELTA5, &[0]);
	// class_this, class_super, interface count
	push_band(&mut bytes, DELTA5, &[0]);
	push_band(&mut bytes, DELTA5, &[1]);
	push_band(&mut bytes, DELTA5, &[0]);
	// one method, no fields
	push_band(&mut bytes, DELTA5, &[0]);
	push_band(&mut bytes, DELTA5, &[1]);
	// method_descr: descr 0
	push_band(&mut bytes, MDELTA5, &[0]);
	// method_flags: ACC_PUBLIC plus the Code attribute bit (17)
	push_band(&mut bytes, UNSIGNED5, &[(1 << 17) | 1]);
	// class_flags
	push_band(&mut bytes, UNSIGNED5, &[0x20]);
	// code_headers: short header, stack 0, locals 0, handlers 0
	push_band(&mut bytes, BYTE1, &[1]);
	// bc_codes: return, end marker
	push_band(&mut bytes, BYTE1, &[opcode::RETURN as i64, 255]);

	let pkg = read_package_bytes(&bytes)?;
	let cls = &pkg.classes[0];
	let method = &cls.methods[0];
	assert_eq!(method.flags, 1);
	let code = method.code.as_ref().expect("code holder");
	assert_eq!(code.bytes, vec![opcode::RETURN]);
	assert_eq!(code.insn_map, vec![0]);
	assert_eq!((code.max_stack, code.max_na_locals), (0, 0));
	assert!(code.handlers.is_empty());
	Ok(())
}

/// A self-linker `getfield` against `this`, with the implicit `aload_0`.
#[test]
fn self_linker_field_op() -> Result<()> {
	let mut bytes = header_0(0);
	// Utf8=6, Class=2, Signature=2, Descr=2, Field=1; one class
	push_band(&mut bytes, UNSIGNED5, &[6, 0, 2, 2, 2, 1, 0, 0, 0, 0, 52, 1]);
	// cp_Utf8: "", "()V", "A", "I", "f", "java/lang/Object"
	push_band(&mut bytes, DELTA5, &[0, 0, 0, 0]);
	push_band(&mut bytes, UNSIGNED5, &[3, 1, 1, 1, 16]);
	push_chars(&mut bytes, "()V");
	push_chars(&mut bytes, "A");
	push_chars(&mut bytes, "I");
	push_chars(&mut bytes, "f");
	push_chars(&mut bytes, "java/lang/Object");
	// cp_Class: "A" (2), "java/lang/Object" (5)
	push_band(&mut bytes, UDELTA5, &[2, 5]);
	// cp_Signature: "()V" (1), "I" (3)
	push_band(&mut bytes, DELTA5, &[1, 3]);
	// cp_Descr: f:I, then A:()V as the method descriptor
	push_band(&mut bytes, UDELTA5, &[4, 2]); // names: "f", "A"
	push_band(&mut bytes, DELTA5, &[1, 0]); // types: sig "I", sig "()V"
	// cp_Field: A.f:I
	push_band(&mut bytes, DELTA5, &[0]); // class A
	push_band(&mut bytes, UDELTA5, &[0]); // descr f:I
	// class header: A extends java/lang/Object
	push_band(&mut bytes, DELTA5, &[0]);
	push_band(&mut bytes, DELTA5, &[1]);
	push_band(&mut bytes, DELTA5, &[0]);
	// one field, one method
	push_band(&mut bytes, DELTA5, &[1]);
	push_band(&mut bytes, DELTA5, &[1]);
	// field_descr f:I, field flags ACC_PRIVATE
	push_band(&mut bytes, DELTA5, &[0]);
	push_band(&mut bytes, UNSIGNED5, &[0x2]);
	// method_descr A:()V, method flags: public + Code bit
	push_band(&mut bytes, MDELTA5, &[1]);
	push_band(&mut bytes, UNSIGNED5, &[(1 << 17) | 1]);
	// class flags
	push_band(&mut bytes, UNSIGNED5, &[0x20]);
	// code_headers: stack 1, locals 1 of the short form
	push_band(&mut bytes, BYTE1, &[1 + 1 + 12]);
	// bc_codes: aload_0&getfield_this, end marker
	let self_linker_getfield_aload = 202 + (opcode::GETFIELD - opcode::GETSTATIC) as i64 + 7;
	push_band(&mut bytes, BYTE1, &[self_linker_getfield_aload, 255]);
	// bc_thisfield: first field member of the current class
	push_band(&mut bytes, UNSIGNED5, &[0]);

	let pkg = read_package_bytes(&bytes)?;
	let cls = &pkg.classes[0];
	let code = cls.methods[0].code.as_ref().expect("code holder");
	assert_eq!(code.bytes, vec![opcode::ALOAD_0, opcode::GETFIELD, 0, 0]);
	// the aload_0 keeps its own instruction boundary
	assert_eq!(code.insn_map, vec![0, 1]);
	let fixup = code.fixups.iter().next().expect("one fixup");
	assert_eq!(fixup.offset, 2);
	let Entry::Member { tag, class, desc } = pkg.pool.entry(fixup.entry) else {
		panic!("fixup entry is not a member");
	};
	assert_eq!(*tag, Tag::Fieldref);
	assert_eq!(pkg.pool.class_name(*class)?, "A");
	assert_eq!(pkg.pool.describe(*desc), "f:I");

	// every expanded opcode length matches the instruction walker
	let mut pc = 0;
	let mut boundaries = vec![];
	while pc < code.bytes.len() {
		boundaries.push(pc as u32);
		pc = unpack200::instruction::next_pc(&code.bytes, pc)?;
	}
	assert_eq!(boundaries, code.insn_map);
	Ok(())
}

/// Resource files and a classfile stub, under declared file headers: the
/// stub binds to the class, and the declared archive size must match the
/// bytes served.
#[test]
fn files_and_stubs() -> Result<()> {
	let mut tail = Vec::new();
	// next_count, default modtime, file count; cp counts (Utf8=5,
	// Class=2); ic count; class version; one class
	push_band(&mut tail, UNSIGNED5, &[0, 1234567, 2]);
	push_band(&mut tail, UNSIGNED5, &[5, 0, 2, 0, 0, 0, 0, 0, 0, 0, 52, 1]);
	// cp_Utf8: "", "A", "A.class", "hello.txt", "java/lang/Object"
	push_band(&mut tail, DELTA5, &[1, 0, 0]); // prefixes: "A.class" shares "A"
	push_band(&mut tail, UNSIGNED5, &[1, 6, 9, 16]);
	push_chars(&mut tail, "A");
	push_chars(&mut tail, ".class");
	push_chars(&mut tail, "hello.txt");
	push_chars(&mut tail, "java/lang/Object");
	// cp_Class: "A" (1), "java/lang/Object" (4)
	push_band(&mut tail, UDELTA5, &[1, 4]);
	// class bands: A extends Object, no members
	push_band(&mut tail, DELTA5, &[0]);
	push_band(&mut tail, DELTA5, &[1]);
	push_band(&mut tail, DELTA5, &[0]);
	push_band(&mut tail, DELTA5, &[0]);
	push_band(&mut tail, DELTA5, &[0]);
	push_band(&mut tail, UNSIGNED5, &[0x20]);
	// file_bands: "hello.txt" with two bytes, then the class stub
	push_band(&mut tail, UNSIGNED5, &[3, 2]); // names
	push_band(&mut tail, UNSIGNED5, &[2, 0]); // size_lo
	tail.extend_from_slice(b"hi"); // file_bits

	let mut bytes = header_0(AO_HAVE_FILE_HEADERS);
	push_band(&mut bytes, UNSIGNED5, &[0, tail.len() as i64]); // archive_header_S
	bytes.extend_from_slice(&tail);

	let pkg = read_package_bytes(&bytes)?;
	assert_eq!(pkg.default_modtime, 1234567);
	assert_eq!(pkg.files.len(), 2);
	assert_eq!(pkg.pool.utf8_text(pkg.files[0].name)?, "hello.txt");
	assert_eq!(pkg.files[0].bytes, b"hi");
	assert_eq!(pkg.files[0].modtime, 1234567);
	assert_eq!(pkg.pool.utf8_text(pkg.files[1].name)?, "A.class");
	assert!(pkg.files[1].bytes.is_empty());
	assert_eq!(pkg.classes[0].file, Some(1));
	Ok(())
}

/// A wrong declared archive size is a hard error.
#[test]
fn size_mismatch_is_rejected() {
	let mut tail = Vec::new();
	push_band(&mut tail, UNSIGNED5, &[0, 0, 0]);
	push_band(&mut tail, UNSIGNED5, &[0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 52, 0]);

	let mut bytes = header_0(AO_HAVE_FILE_HEADERS);
	push_band(&mut bytes, UNSIGNED5, &[0, tail.len() as i64 + 7]);
	bytes.extend_from_slice(&tail);
	// pad so the under-declared region can still be buffered
	bytes.extend_from_slice(&[0; 7]);

	let err = read_package_bytes(&bytes).unwrap_err();
	assert!(matches!(
		err.downcast_ref::<UnpackError>(),
		Some(UnpackError::SizeMismatch { .. })
	));
}

/// An archive-defined attribute layout `RUH` at a free flag bit: the
/// class claims it, the value lands as a fixup, and the bit is cleared
/// from the residual access flags.
#[test]
fn archive_defined_attribute() -> Result<()> {
	let mut bytes = header_0(AO_HAVE_SPECIAL_FORMATS);
	// band_headers size 0, one attribute definition
	push_band(&mut bytes, UNSIGNED5, &[0, 1]);
	// cp counts: Utf8=5, Class=2; one class
	push_band(&mut bytes, UNSIGNED5, &[5, 0, 2, 0, 0, 0, 0, 0, 0, 0, 52, 1]);
	// cp_Utf8: "", "A", "Deco", "RUH", "java/lang/Object"
	push_band(&mut bytes, DELTA5, &[0, 0, 0]);
	push_band(&mut bytes, UNSIGNED5, &[1, 4, 3, 16]);
	push_chars(&mut bytes, "A");
	push_chars(&mut bytes, "Deco");
	push_chars(&mut bytes, "RUH");
	push_chars(&mut bytes, "java/lang/Object");
	// cp_Class
	push_band(&mut bytes, UDELTA5, &[1, 4]);
	// attr_definition bands: context class, flag index 6
	push_band(&mut bytes, BYTE1, &[(6 + 1) << 2]);
	push_band(&mut bytes, UNSIGNED5, &[2]); // name "Deco"
	push_band(&mut bytes, UNSIGNED5, &[3]); // layout "RUH"
	// class bands
	push_band(&mut bytes, DELTA5, &[0]);
	push_band(&mut bytes, DELTA5, &[1]);
	push_band(&mut bytes, DELTA5, &[0]);
	push_band(&mut bytes, DELTA5, &[0]);
	push_band(&mut bytes, DELTA5, &[0]);
	// class flags: ACC_SUPER plus the claimed bit 6
	push_band(&mut bytes, UNSIGNED5, &[0x20 | (1 << 6)]);
	// the attribute's one element band: utf8 "Deco" reused as a value
	push_band(&mut bytes, UNSIGNED5, &[2]);

	let pkg = read_package_bytes(&bytes)?;
	let cls = &pkg.classes[0];
	assert_eq!(cls.flags, 0x20, "the attribute bit is stripped");
	let attr = cls
		.attributes
		.iter()
		.find(|a| pkg.pool.describe(a.name) == "Deco")
		.expect("the defined attribute is present");
	assert_eq!(attr.bytes, vec![0, 0]);
	let fixup = attr.fixups.iter().next().expect("one reference fixup");
	assert_eq!(pkg.pool.describe(fixup.entry), "Deco");
	Ok(())
}
