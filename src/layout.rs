//! Attribute layouts: the miniature grammar describing how an attribute's
//! payload is split across bands, plus the per-context registry of layout
//! definitions.
//!
//! A layout is either a flat element list or a sequence of `[..]`
//! callables invoked through `(n)` call elements. Every value-bearing
//! element owns one band; band indexes are assigned in parse order, which
//! is also the order the bands appear in the archive.

use anyhow::{anyhow, bail, Result};
use java_string::{JavaStr, JavaString};

use crate::coding::{Coding, BCI5, BRANCH5, BYTE1, SIGNED5, UNSIGNED5};
use crate::constants::{Ctx, Tag, ATTR_OVERFLOW_BIT};
use crate::error::UnpackError;
use crate::pool::{EntryRef, Pool};

/// What a reference element points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefTag {
	Pool(Tag),
	/// `KQ`: the pool depends on the current field's descriptor.
	FieldSpecific,
}

#[derive(Debug, Clone)]
pub enum Elem {
	Int { band: usize, signed: bool, size: u8 },
	Flag { band: usize, size: u8 },
	/// `P`/`PO`: a renumbered bytecode index, possibly a delta off the
	/// previous one.
	Bci { band: usize, delta: bool, size: u8 },
	/// `O`/`OS`: a length given as the distance to the next bytecode index.
	Bco { band: usize, signed: bool, size: u8 },
	Ref { band: usize, tag: RefTag, nullable: bool, size: u8 },
	Repl { band: usize, size: u8, body: Vec<Elem> },
	Union { band: usize, signed: bool, size: u8, cases: Vec<UnionCase>, default_body: Vec<Elem> },
	Call { target: usize, back: bool },
}

#[derive(Debug, Clone)]
pub struct UnionCase {
	pub values: Vec<i32>,
	pub body: Vec<Elem>,
}

#[derive(Debug, Clone)]
pub struct Callable {
	pub body: Vec<Elem>,
	/// Whether any call reaches this callable backwards; such callables
	/// get their extra entry counts from the `attr_calls` band.
	pub back: bool,
}

#[derive(Debug, Clone)]
pub struct AttrLayout {
	pub ctx: Ctx,
	pub name: JavaString,
	pub name_ref: EntryRef,
	pub layout: String,
	/// Flat element list when the layout has no callables.
	pub elems: Vec<Elem>,
	pub callables: Vec<Callable>,
	pub band_count: usize,
}

impl AttrLayout {
	pub fn has_callables(&self) -> bool {
		!self.callables.is_empty()
	}
}

/// Default coding of an element's band, by element kind and size.
pub fn elem_band_coding(elem: &Elem) -> Coding {
	fn int_coding(signed: bool, size: u8) -> Coding {
		if signed {
			SIGNED5
		} else if size == 1 {
			BYTE1
		} else {
			UNSIGNED5
		}
	}
	match *elem {
		Elem::Int { signed, size, .. } => int_coding(signed, size),
		Elem::Flag { size, .. } => int_coding(false, size),
		Elem::Bci { delta: false, .. } => BCI5,
		Elem::Bci { delta: true, .. } => BRANCH5,
		Elem::Bco { .. } => BRANCH5,
		Elem::Ref { .. } => UNSIGNED5,
		Elem::Repl { size, .. } => int_coding(false, size),
		Elem::Union { signed, size, .. } => int_coding(signed, size),
		Elem::Call { .. } => unreachable!("calls have no band"),
	}
}

struct Parser<'a> {
	bytes: &'a [u8],
	pos: usize,
	bands: usize,
}

impl<'a> Parser<'a> {
	fn peek(&self) -> Option<u8> {
		self.bytes.get(self.pos).copied()
	}

	fn next(&mut self) -> Result<u8> {
		let b = self.peek().ok_or_else(|| anyhow!("layout ends unexpectedly"))?;
		self.pos += 1;
		Ok(b)
	}

	fn expect(&mut self, want: u8) -> Result<()> {
		let got = self.next()?;
		if got != want {
			bail!("expected {:?} at layout position {}", want as char, self.pos - 1);
		}
		Ok(())
	}

	fn eat(&mut self, want: u8) -> bool {
		if self.peek() == Some(want) {
			self.pos += 1;
			true
		} else {
			false
		}
	}

	fn new_band(&mut self) -> usize {
		let b = self.bands;
		self.bands += 1;
		b
	}

	fn size(&mut self) -> Result<u8> {
		match self.next()? {
			b'B' => Ok(1),
			b'H' => Ok(2),
			b'I' => Ok(4),
			b'V' => Ok(0),
			c => bail!("bad size letter {:?}", c as char),
		}
	}

	fn numeral(&mut self) -> Result<i32> {
		let negative = self.eat(b'-');
		let mut digits = 0;
		let mut value: i64 = 0;
		while let Some(c @ b'0'..=b'9') = self.peek() {
			self.pos += 1;
			value = value * 10 + (c - b'0') as i64;
			digits += 1;
		}
		if digits == 0 {
			bail!("expected a numeral at layout position {}", self.pos);
		}
		Ok(if negative { -value as i32 } else { value as i32 })
	}

	fn ref_tag(&mut self, kind: u8) -> Result<RefTag> {
		let c = self.next()?;
		let tag = match (kind, c) {
			(b'K', b'I') => RefTag::Pool(Tag::Int),
			(b'K', b'J') => RefTag::Pool(Tag::Long),
			(b'K', b'F') => RefTag::Pool(Tag::Float),
			(b'K', b'D') => RefTag::Pool(Tag::Double),
			(b'K', b'S') => RefTag::Pool(Tag::String),
			(b'K', b'M') => RefTag::Pool(Tag::MethodHandle),
			(b'K', b'T') => RefTag::Pool(Tag::MethodType),
			(b'K', b'L') => RefTag::Pool(Tag::LoadableValue),
			(b'K', b'Q') => RefTag::FieldSpecific,
			(b'R', b'C') => RefTag::Pool(Tag::Class),
			(b'R', b'S') => RefTag::Pool(Tag::Signature),
			(b'R', b'D') => RefTag::Pool(Tag::NameAndType),
			(b'R', b'F') => RefTag::Pool(Tag::Fieldref),
			(b'R', b'M') => RefTag::Pool(Tag::Methodref),
			(b'R', b'I') => RefTag::Pool(Tag::InterfaceMethodref),
			(b'R', b'Y') => RefTag::Pool(Tag::InvokeDynamic),
			(b'R', b'B') => RefTag::Pool(Tag::BootstrapMethod),
			(b'R', b'N') => RefTag::Pool(Tag::AnyMember),
			(b'R', b'U') => RefTag::Pool(Tag::Utf8),
			(b'R', b'Q') => RefTag::Pool(Tag::All),
			_ => bail!("bad reference type {:?}{:?}", kind as char, c as char),
		};
		Ok(tag)
	}

	fn body(&mut self) -> Result<Vec<Elem>> {
		let mut elems = Vec::new();
		loop {
			match self.peek() {
				None | Some(b']') => return Ok(elems),
				_ => elems.push(self.elem()?),
			}
		}
	}

	fn bracketed_body(&mut self) -> Result<Vec<Elem>> {
		self.expect(b'[')?;
		let body = self.body()?;
		self.expect(b']')?;
		Ok(body)
	}

	fn elem(&mut self) -> Result<Elem> {
		match self.next()? {
			b'B' | b'H' | b'I' | b'V' => {
				self.pos -= 1;
				Ok(Elem::Int { band: self.new_band(), signed: false, size: self.size()? })
			}
			b'S' => Ok(Elem::Int { band: self.new_band(), signed: true, size: self.size()? }),
			b'F' => Ok(Elem::Flag { band: self.new_band(), size: self.size()? }),
			b'P' => {
				let delta = self.eat(b'O');
				Ok(Elem::Bci { band: self.new_band(), delta, size: self.size()? })
			}
			b'O' => {
				let signed = self.eat(b'S');
				Ok(Elem::Bco { band: self.new_band(), signed, size: self.size()? })
			}
			b'N' => {
				let size = self.size()?;
				let band = self.new_band();
				Ok(Elem::Repl { band, size, body: self.bracketed_body()? })
			}
			b'T' => {
				let signed = self.eat(b'S');
				let size = self.size()?;
				let band = self.new_band();
				let mut cases = Vec::new();
				loop {
					self.expect(b'(')?;
					if self.eat(b')') {
						// the default case closes the union
						return Ok(Elem::Union {
							band,
							signed,
							size,
							cases,
							default_body: self.bracketed_body()?,
						});
					}
					let mut values = vec![self.numeral()?];
					loop {
						if self.eat(b'-') {
							let hi = self.numeral()?;
							let lo = *values.last().unwrap();
							values.extend(lo + 1..=hi);
						}
						if !self.eat(b',') {
							break;
						}
						values.push(self.numeral()?);
					}
					self.expect(b')')?;
					cases.push(UnionCase { values, body: self.bracketed_body()? });
				}
			}
			b'(' => {
				let rel = self.numeral()?;
				self.expect(b')')?;
				// relative target; resolved against the enclosing callable
				Ok(Elem::Call { target: rel as u32 as usize, back: rel <= 0 })
			}
			c @ (b'K' | b'R') => {
				let tag = self.ref_tag(c)?;
				let nullable = self.eat(b'N');
				Ok(Elem::Ref { band: self.new_band(), tag, nullable, size: self.size()? })
			}
			c => bail!("unknown layout element {:?}", c as char),
		}
	}
}

/// Rewrites relative call targets to absolute callable indexes and marks
/// backward-called callables.
fn resolve_calls(body: &mut [Elem], here: usize, backs: &mut Vec<usize>, limit: usize) -> Result<()> {
	for elem in body {
		match elem {
			Elem::Call { target, back } => {
				let rel = *target as u32 as i32;
				let abs = here as i32 + rel;
				if !(0..limit as i32).contains(&abs) {
					bail!("call target {} out of range", rel);
				}
				*target = abs as usize;
				if *back {
					backs.push(abs as usize);
				}
			}
			Elem::Repl { body, .. } => resolve_calls(body, here, backs, limit)?,
			Elem::Union { cases, default_body, .. } => {
				for case in cases {
					resolve_calls(&mut case.body, here, backs, limit)?;
				}
				resolve_calls(default_body, here, backs, limit)?;
			}
			_ => {}
		}
	}
	Ok(())
}

/// Parses a layout string. Fails with [`UnpackError::BadLayout`] on any
/// construct the grammar does not know.
pub fn parse_layout(ctx: Ctx, name: JavaString, name_ref: EntryRef, layout: &str) -> Result<AttrLayout> {
	let mut parser = Parser { bytes: layout.as_bytes(), pos: 0, bands: 0 };
	let inner = |parser: &mut Parser| -> Result<(Vec<Elem>, Vec<Callable>)> {
		if parser.peek() == Some(b'[') {
			let mut callables = Vec::new();
			while parser.peek().is_some() {
				callables.push(Callable { body: parser.bracketed_body()?, back: false });
			}
			let limit = callables.len();
			let mut backs = Vec::new();
			for i in 0..callables.len() {
				resolve_calls(&mut callables[i].body, i, &mut backs, limit)?;
			}
			for b in backs {
				callables[b].back = true;
			}
			Ok((Vec::new(), callables))
		} else {
			let mut elems = parser.body()?;
			if let Some(trailing) = parser.peek() {
				bail!("trailing {:?}", trailing as char);
			}
			// calls are only meaningful between callables
			let mut backs = Vec::new();
			resolve_calls(&mut elems, 0, &mut backs, 0)?;
			Ok((elems, Vec::new()))
		}
	};
	match inner(&mut parser) {
		Ok((elems, callables)) => Ok(AttrLayout {
			ctx,
			name,
			name_ref,
			layout: layout.to_owned(),
			elems,
			callables,
			band_count: parser.bands,
		}),
		Err(e) => Err(e.context(UnpackError::BadLayout { layout: layout.to_owned() })),
	}
}

/// Canonical layouts of the annotation metadata attributes.
const METADATA_VALUE_CASES: &str = "[TB(66,67,73,83,90)[KIH](68)[KDH](70)[KFH](74)[KJH](99)[RSH](101)[RSHRUH](115)[RUH](91)[NH[(0)]](64)[(-1)]()[]]";

fn annotations_layout() -> String {
	format!("[NH[(1)]][RSHNH[RUH(1)]]{METADATA_VALUE_CASES}")
}

fn parameter_annotations_layout() -> String {
	format!("[NB[(1)]][NH[(1)]][RSHNH[RUH(1)]]{METADATA_VALUE_CASES}")
}

fn annotation_default_layout() -> String {
	format!("[(2)][RSHNH[RUH(1)]]{METADATA_VALUE_CASES}")
}

const STACK_MAP_TABLE_LAYOUT: &str = "[NH[(1)]][TB(64-127)[(2)](247)[(1)(2)](248-251)[(1)](252)[(1)(2)](253)[(1)(2)(2)](254)[(1)(2)(2)(2)](255)[(1)NH[(2)]NH[(2)]]()[]][H][TB(7)[RCH](8)[PH]()[]]";

/// Identifies one layout definition within the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LayoutHandle {
	pub ctx: Ctx,
	pub slot: Slot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Slot {
	/// Bound to a flag bit (or appended past the flag area for defs with
	/// index −1, reachable only through the overflow protocol).
	Flag(usize),
	/// Synthesized attributes that are never transmitted through flags.
	Special(usize),
}

pub struct AttrDefs {
	defs: [Vec<Option<AttrLayout>>; 4],
	specials: Vec<AttrLayout>,
	limits: [usize; 4],
	flag_mask: [u64; 4],
	archive_defined: [u64; 4],
	// handles of layouts the reader treats specially
	pub code: LayoutHandle,
	pub inner_classes: LayoutHandle,
	pub class_file_version: LayoutHandle,
	pub source_file: LayoutHandle,
	pub constant_value: LayoutHandle,
	pub bootstrap_methods: LayoutHandle,
}

impl AttrDefs {
	/// Installs the predefined attribute layouts. `have_flags_hi` widens a
	/// context's flag index space from 32 to 63 bits.
	pub fn new(pool: &mut Pool, have_flags_hi: [bool; 4]) -> Result<AttrDefs> {
		let mut limits = [0usize; 4];
		for (i, &hi) in have_flags_hi.iter().enumerate() {
			limits[i] = if hi { 63 } else { 32 };
		}
		let mut defs = AttrDefs {
			defs: std::array::from_fn(|i| {
				let mut v = Vec::new();
				v.resize_with(limits[i], || None);
				v
			}),
			specials: Vec::new(),
			limits,
			flag_mask: [1 << ATTR_OVERFLOW_BIT; 4],
			archive_defined: [0; 4],
			code: LayoutHandle { ctx: Ctx::Method, slot: Slot::Flag(17) },
			inner_classes: LayoutHandle { ctx: Ctx::Class, slot: Slot::Flag(23) },
			class_file_version: LayoutHandle { ctx: Ctx::Class, slot: Slot::Flag(24) },
			source_file: LayoutHandle { ctx: Ctx::Class, slot: Slot::Flag(17) },
			constant_value: LayoutHandle { ctx: Ctx::Field, slot: Slot::Flag(17) },
			bootstrap_methods: LayoutHandle { ctx: Ctx::Class, slot: Slot::Special(0) },
		};

		let rva = annotations_layout();
		let rvpa = parameter_annotations_layout();
		let ad = annotation_default_layout();
		let predefined: &[(Ctx, usize, &str, &str)] = &[
			(Ctx::Class, 17, "SourceFile", "RUNH"),
			(Ctx::Class, 18, "EnclosingMethod", "RCHRDNH"),
			(Ctx::Class, 19, "Signature", "RSH"),
			(Ctx::Class, 20, "Deprecated", ""),
			(Ctx::Class, 21, "RuntimeVisibleAnnotations", &rva),
			(Ctx::Class, 22, "RuntimeInvisibleAnnotations", &rva),
			(Ctx::Class, 23, "InnerClasses", ""),
			(Ctx::Class, 24, ".ClassFile.version", "HH"),
			(Ctx::Field, 17, "ConstantValue", "KQH"),
			(Ctx::Field, 19, "Signature", "RSH"),
			(Ctx::Field, 20, "Deprecated", ""),
			(Ctx::Field, 21, "RuntimeVisibleAnnotations", &rva),
			(Ctx::Field, 22, "RuntimeInvisibleAnnotations", &rva),
			(Ctx::Method, 17, "Code", ""),
			(Ctx::Method, 18, "Exceptions", "NH[RCH]"),
			(Ctx::Method, 19, "Signature", "RSH"),
			(Ctx::Method, 20, "Deprecated", ""),
			(Ctx::Method, 21, "RuntimeVisibleAnnotations", &rva),
			(Ctx::Method, 22, "RuntimeInvisibleAnnotations", &rva),
			(Ctx::Method, 23, "RuntimeVisibleParameterAnnotations", &rvpa),
			(Ctx::Method, 24, "RuntimeInvisibleParameterAnnotations", &rvpa),
			(Ctx::Method, 25, "AnnotationDefault", &ad),
			(Ctx::Method, 26, "MethodParameters", "NB[RUNHFH]"),
			(Ctx::Code, 0, "StackMapTable", STACK_MAP_TABLE_LAYOUT),
			(Ctx::Code, 1, "LineNumberTable", "NH[PHH]"),
			(Ctx::Code, 2, "LocalVariableTable", "NH[PHOHRUHRSHH]"),
			(Ctx::Code, 3, "LocalVariableTypeTable", "NH[PHOHRUHRSHH]"),
		];
		for &(ctx, index, name, layout) in predefined {
			defs.install(pool, ctx, index as i32, JavaStr::from_str(name).to_owned(), layout, false)?;
		}

		let bsm_name = pool.utf8_str("BootstrapMethods");
		defs.specials.push(parse_layout(
			Ctx::Class,
			JavaStr::from_str("BootstrapMethods").to_owned(),
			bsm_name,
			"",
		)?);

		Ok(defs)
	}

	fn install(
		&mut self,
		pool: &mut Pool,
		ctx: Ctx,
		index: i32,
		name: JavaString,
		layout: &str,
		from_archive: bool,
	) -> Result<LayoutHandle> {
		let name_ref = pool.utf8(name.clone());
		let parsed = parse_layout(ctx, name, name_ref, layout)?;
		let c = ctx as usize;
		let slot = if index < 0 {
			// overflow-only definition, appended past the flag area
			self.defs[c].push(Some(parsed));
			self.defs[c].len() - 1
		} else {
			let index = index as usize;
			if index >= self.limits[c] {
				bail!(UnpackError::BadAttrIndex { index: index as i32, context: ctx.name() });
			}
			self.defs[c][index] = Some(parsed);
			self.flag_mask[c] |= 1 << index;
			if from_archive {
				self.archive_defined[c] |= 1 << index;
			}
			index
		};
		Ok(LayoutHandle { ctx, slot: Slot::Flag(slot) })
	}

	/// Registers a definition from `attr_definition_bands`, replacing any
	/// predefined layout at the same flag index.
	pub fn define_from_archive(
		&mut self,
		pool: &mut Pool,
		ctx: Ctx,
		index: i32,
		name: JavaString,
		layout: &str,
	) -> Result<LayoutHandle> {
		self.install(pool, ctx, index, name, layout, true)
	}

	pub fn get(&self, handle: LayoutHandle) -> &AttrLayout {
		match handle.slot {
			Slot::Flag(i) => self.defs[handle.ctx as usize][i]
				.as_ref()
				.expect("layout handle points at an empty slot"),
			Slot::Special(i) => &self.specials[i],
		}
	}

	pub fn lookup(&self, ctx: Ctx, index: usize) -> Option<&AttrLayout> {
		self.defs[ctx as usize].get(index).and_then(Option::as_ref)
	}

	/// Number of layout slots in a context, appended overflow defs included.
	pub fn slot_count(&self, ctx: Ctx) -> usize {
		self.defs[ctx as usize].len()
	}

	pub fn index_limit(&self, ctx: Ctx) -> usize {
		self.limits[ctx as usize]
	}

	/// Mask of flag bits that select attributes in this context.
	pub fn flag_mask(&self, ctx: Ctx) -> u64 {
		self.flag_mask[ctx as usize]
	}

	pub fn overflow_mask(&self) -> u64 {
		1 << ATTR_OVERFLOW_BIT
	}

	/// Predefined layouts are populated before archive-defined ones.
	/// Slots appended past the flag area always came from the archive.
	pub fn is_predefined(&self, ctx: Ctx, index: usize) -> bool {
		index < self.limits[ctx as usize]
			&& (self.archive_defined[ctx as usize] & (1 << index)) == 0
	}
}

#[cfg(test)]
mod testing {
	use pretty_assertions::assert_eq;
	use super::*;

	fn parse(layout: &str) -> AttrLayout {
		let mut pool = Pool::new();
		let name_ref = pool.utf8_str("Test");
		parse_layout(Ctx::Class, JavaStr::from_str("Test").to_owned(), name_ref, layout).unwrap()
	}

	#[test]
	fn flat_layout() {
		let l = parse("RSHRUH");
		assert!(!l.has_callables());
		assert_eq!(l.band_count, 2);
		assert!(matches!(
			l.elems[0],
			Elem::Ref { band: 0, tag: RefTag::Pool(Tag::Signature), nullable: false, size: 2 }
		));
	}

	#[test]
	fn replication_owns_count_band_then_body_bands() {
		let l = parse("NH[RCH]");
		assert_eq!(l.band_count, 2);
		let Elem::Repl { band, size, body } = &l.elems[0] else {
			panic!("not a replication");
		};
		assert_eq!((*band, *size), (0, 2));
		assert!(matches!(body[0], Elem::Ref { band: 1, .. }));
	}

	#[test]
	fn nullable_and_bci_elements() {
		let l = parse("NH[PHOHRUHRSHH]");
		assert_eq!(l.band_count, 6);
		let Elem::Repl { body, .. } = &l.elems[0] else {
			panic!("not a replication");
		};
		assert!(matches!(body[0], Elem::Bci { delta: false, size: 2, .. }));
		assert!(matches!(body[1], Elem::Bco { signed: false, size: 2, .. }));
		assert!(matches!(body[4], Elem::Int { signed: false, size: 2, .. }));
	}

	#[test]
	fn union_with_ranges_and_default() {
		let l = parse("TB(1,2)[KIH](64-66)[RUH]()[]");
		let Elem::Union { cases, default_body, .. } = &l.elems[0] else {
			panic!("not a union");
		};
		assert_eq!(cases[0].values, vec![1, 2]);
		assert_eq!(cases[1].values, vec![64, 65, 66]);
		assert!(default_body.is_empty());
	}

	#[test]
	fn callables_and_backward_calls() {
		let l = parse(&super::annotations_layout());
		assert!(l.has_callables());
		assert_eq!(l.callables.len(), 3);
		// the element-value union calls itself and the annotation callable
		assert!(l.callables[2].back);
		assert!(l.callables[1].back);
		assert!(!l.callables[0].back);
	}

	#[test]
	fn stack_map_table_parses() {
		let l = parse(STACK_MAP_TABLE_LAYOUT);
		assert_eq!(l.callables.len(), 4);
		// every call in the frame layout runs forward
		assert!(l.callables.iter().all(|c| !c.back));
	}

	#[test]
	fn junk_is_rejected() {
		let mut pool = Pool::new();
		let name_ref = pool.utf8_str("Test");
		assert!(parse_layout(Ctx::Class, JavaStr::from_str("Test").to_owned(), name_ref, "RXH").is_err());
		assert!(parse_layout(Ctx::Class, JavaStr::from_str("Test").to_owned(), name_ref, "NH[").is_err());
	}
}
