//! The interned constant pool store.
//!
//! Every entry lives in an arena and is passed around as a copyable
//! [`EntryRef`]. A hash map keyed by structural equality deduplicates.
//! Entries only ever reference entries of tags constructed before their
//! own, so there are no cycles to manage.
//!
//! Numeric entries keep their raw bit patterns: interning by bits avoids
//! any trouble with NaN equality, and the writer re-emits bits anyway.

use std::collections::HashMap;

use anyhow::{anyhow, bail, Result};
use java_string::{JavaStr, JavaString};

use crate::constants::Tag;

/// Stable handle to one pool entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntryRef(u32);

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Entry {
	Utf8(JavaString),
	Int(i32),
	Float(u32),
	Long(i64),
	Double(u64),
	String(EntryRef),
	Class(EntryRef),
	Signature {
		form: EntryRef,
		classes: Vec<EntryRef>,
		/// The plain Utf8 descriptor this signature erases to in output.
		erased: EntryRef,
	},
	NameAndType {
		name: EntryRef,
		typ: EntryRef,
	},
	Member {
		tag: Tag,
		class: EntryRef,
		desc: EntryRef,
	},
	MethodHandle {
		ref_kind: u8,
		member: EntryRef,
	},
	MethodType(EntryRef),
	InvokeDynamic {
		bsm: EntryRef,
		desc: EntryRef,
	},
	BootstrapMethod {
		bsm: EntryRef,
		args: Vec<EntryRef>,
	},
}

impl Entry {
	pub fn tag(&self) -> Tag {
		match self {
			Entry::Utf8(_) => Tag::Utf8,
			Entry::Int(_) => Tag::Int,
			Entry::Float(_) => Tag::Float,
			Entry::Long(_) => Tag::Long,
			Entry::Double(_) => Tag::Double,
			Entry::String(_) => Tag::String,
			Entry::Class(_) => Tag::Class,
			Entry::Signature { .. } => Tag::Signature,
			Entry::NameAndType { .. } => Tag::NameAndType,
			Entry::Member { tag, .. } => *tag,
			Entry::MethodHandle { .. } => Tag::MethodHandle,
			Entry::MethodType(_) => Tag::MethodType,
			Entry::InvokeDynamic { .. } => Tag::InvokeDynamic,
			Entry::BootstrapMethod { .. } => Tag::BootstrapMethod,
		}
	}
}

#[derive(Debug)]
struct EntrySlot {
	entry: Entry,
	/// Position in the archive's global pool ordering, for entries that
	/// came out of the `cp_bands`; entries synthesized later have none.
	output_index: Option<u32>,
}

#[derive(Default, Debug)]
pub struct Pool {
	slots: Vec<EntrySlot>,
	intern: HashMap<Entry, EntryRef>,
	by_tag: HashMap<Tag, Vec<EntryRef>>,
	next_output_index: u32,
}

impl Pool {
	pub fn new() -> Pool {
		Pool::default()
	}

	pub fn intern(&mut self, entry: Entry) -> EntryRef {
		if let Some(&r) = self.intern.get(&entry) {
			return r;
		}
		let r = EntryRef(self.slots.len() as u32);
		self.intern.insert(entry.clone(), r);
		self.slots.push(EntrySlot { entry, output_index: None });
		r
	}

	pub fn entry(&self, r: EntryRef) -> &Entry {
		&self.slots[r.0 as usize].entry
	}

	pub fn tag_of(&self, r: EntryRef) -> Tag {
		self.entry(r).tag()
	}

	pub fn is_double_word(&self, r: EntryRef) -> bool {
		matches!(self.tag_of(r), Tag::Long | Tag::Double)
	}

	pub fn utf8(&mut self, s: JavaString) -> EntryRef {
		self.intern(Entry::Utf8(s))
	}

	pub fn utf8_str(&mut self, s: &str) -> EntryRef {
		self.utf8(JavaStr::from_str(s).to_owned())
	}

	pub fn class_named(&mut self, name: JavaString) -> EntryRef {
		let utf8 = self.utf8(name);
		self.intern(Entry::Class(utf8))
	}

	pub fn utf8_text(&self, r: EntryRef) -> Result<&JavaStr> {
		match self.entry(r) {
			Entry::Utf8(s) => Ok(s.as_java_str()),
			e => bail!("pool entry not Utf8: {:?}", e.tag()),
		}
	}

	pub fn class_name(&self, r: EntryRef) -> Result<&JavaStr> {
		match self.entry(r) {
			Entry::Class(name) => self.utf8_text(*name),
			e => bail!("pool entry not Class: {:?}", e.tag()),
		}
	}

	/// Number of class references a signature form calls for: one per `L`
	/// marker left in the erased descriptor.
	pub fn count_class_parts(&self, form: EntryRef) -> Result<usize> {
		Ok(self.utf8_text(form)?.as_bytes().iter().filter(|&&b| b == b'L').count())
	}

	/// Builds a signature entry, splicing each class name in right after
	/// its `L` marker to precompute the erased Utf8 spelling.
	pub fn make_signature(&mut self, form: EntryRef, classes: Vec<EntryRef>) -> Result<EntryRef> {
		let form_bytes = self.utf8_text(form)?.as_bytes().to_vec();
		let mut spliced = Vec::with_capacity(form_bytes.len());
		let mut class_iter = classes.iter();
		for b in form_bytes {
			spliced.push(b);
			if b == b'L' {
				let class = class_iter
					.next()
					.ok_or_else(|| anyhow!("signature form has more class parts than refs"))?;
				spliced.extend_from_slice(self.class_name(*class)?.as_bytes());
			}
		}
		if class_iter.next().is_some() {
			bail!("signature form has fewer class parts than refs");
		}
		let erased_string = JavaString::from_semi_utf8(spliced)
			.map_err(|e| anyhow!("bad utf8 while erasing a signature: {e}"))?;
		let erased = self.utf8(erased_string);
		Ok(self.intern(Entry::Signature { form, classes, erased }))
	}

	/// The Utf8 spelling a signature erases to.
	pub fn erased_utf8(&self, r: EntryRef) -> Result<EntryRef> {
		match self.entry(r) {
			Entry::Signature { erased, .. } => Ok(*erased),
			e => bail!("pool entry not Signature: {:?}", e.tag()),
		}
	}

	/// Registers the fully-read pool of one tag, in archive order, and
	/// extends the global output ordering over it.
	pub fn init_tag_index(&mut self, tag: Tag, entries: Vec<EntryRef>) {
		for &r in &entries {
			let slot = &mut self.slots[r.0 as usize];
			if slot.output_index.is_none() {
				slot.output_index = Some(self.next_output_index);
				self.next_output_index += 1;
			}
		}
		self.by_tag.insert(tag, entries);
	}

	pub fn tag_index(&self, tag: Tag) -> &[EntryRef] {
		self.by_tag.get(&tag).map(Vec::as_slice).unwrap_or(&[])
	}

	/// Resolves a band value against a tag's pool; group pseudo-tags see
	/// the member pools concatenated in group order.
	pub fn entry_by_tag_index(&self, tag: Tag, n: i32) -> Result<EntryRef> {
		let mut n = usize::try_from(n)
			.map_err(|_| anyhow!("negative {} pool index {}", tag.name(), n))?;
		match tag.group_members() {
			None => self.tag_index(tag).get(n).copied().ok_or_else(|| {
				anyhow!("{} pool index {} out of range {}", tag.name(), n, self.tag_index(tag).len())
			}),
			Some(members) => {
				for &member in members {
					let index = self.tag_index(member);
					if n < index.len() {
						return Ok(index[n]);
					}
					n -= index.len();
				}
				bail!("{} group index out of range", tag.name())
			}
		}
	}

	/// Position of an entry in the archive's global pool ordering, if the
	/// entry came from the archive. Utf8 spellings of archived signatures
	/// count as archived through their signature.
	pub fn output_index(&self, r: EntryRef, utf8_signatures: &HashMap<EntryRef, EntryRef>) -> Option<u32> {
		let slot = &self.slots[r.0 as usize];
		if let Some(k) = slot.output_index {
			return Some(k);
		}
		if slot.entry.tag() == Tag::Utf8 {
			if let Some(&sig) = utf8_signatures.get(&r) {
				return self.slots[sig.0 as usize].output_index;
			}
		}
		None
	}

	/// All members of `tag` whose class is `class`, in pool order.
	pub fn member_index(&self, tag: Tag, class: EntryRef) -> Vec<EntryRef> {
		self.tag_index(tag)
			.iter()
			.copied()
			.filter(|&m| matches!(self.entry(m), Entry::Member { class: c, .. } if *c == class))
			.collect()
	}

	/// The n-th member of `class` with the given simple name, counting in
	/// pool order; used to resolve `<init>` short forms.
	pub fn overloading_for_index(
		&self,
		tag: Tag,
		class: EntryRef,
		name: &str,
		n: usize,
	) -> Result<EntryRef> {
		let mut ord = 0;
		for &m in self.tag_index(tag) {
			let Entry::Member { class: c, desc, .. } = self.entry(m) else {
				continue;
			};
			if *c != class {
				continue;
			}
			let Entry::NameAndType { name: name_ref, .. } = self.entry(*desc) else {
				continue;
			};
			if self.utf8_text(*name_ref)? == name {
				if ord == n {
					return Ok(m);
				}
				ord += 1;
			}
		}
		bail!("overloading {} of {}.{} not found", n, self.describe(class), name)
	}

	/// Whether an entry of tag `got` satisfies an operand slot expecting
	/// `want`, group pseudo-tags included.
	pub fn tag_matches(got: Tag, want: Tag) -> bool {
		if got == want {
			return true;
		}
		match want.group_members() {
			Some(members) => members.contains(&got),
			None => false,
		}
	}

	/// A human-readable spelling, also used as the ordering key for
	/// entries outside the archive's global pool.
	pub fn describe(&self, r: EntryRef) -> String {
		match self.entry(r) {
			Entry::Utf8(s) => s.to_string(),
			Entry::Int(x) => x.to_string(),
			Entry::Float(bits) => format!("{:?}f", f32::from_bits(*bits)),
			Entry::Long(x) => format!("{x}L"),
			Entry::Double(bits) => format!("{:?}d", f64::from_bits(*bits)),
			Entry::String(utf8) => self.describe(*utf8),
			Entry::Class(name) => self.describe(*name),
			Entry::Signature { erased, .. } => self.describe(*erased),
			Entry::NameAndType { name, typ } => {
				format!("{}:{}", self.describe(*name), self.describe(*typ))
			}
			Entry::Member { class, desc, .. } => {
				format!("{}.{}", self.describe(*class), self.describe(*desc))
			}
			Entry::MethodHandle { ref_kind, member } => {
				format!("REF_{}:{}", ref_kind, self.describe(*member))
			}
			Entry::MethodType(sig) => self.describe(*sig),
			Entry::InvokeDynamic { bsm, desc } => {
				format!("Indy:{}.{}", self.describe(*bsm), self.describe(*desc))
			}
			Entry::BootstrapMethod { bsm, args } => {
				let args: Vec<String> = args.iter().map(|&a| self.describe(a)).collect();
				format!("BSM:{}[{}]", self.describe(*bsm), args.join(","))
			}
		}
	}

	/// Entries directly referenced by `r`, as they would appear in a class
	/// file pool. Signatures contribute through their erased spelling; the
	/// reconstruction pass does that substitution itself.
	pub fn children(&self, r: EntryRef, out: &mut Vec<EntryRef>) {
		match self.entry(r) {
			Entry::Utf8(_) | Entry::Int(_) | Entry::Float(_) | Entry::Long(_) | Entry::Double(_) => {}
			Entry::String(utf8) => out.push(*utf8),
			Entry::Class(name) => out.push(*name),
			Entry::Signature { erased, .. } => out.push(*erased),
			Entry::NameAndType { name, typ } => {
				out.push(*name);
				out.push(*typ);
			}
			Entry::Member { class, desc, .. } => {
				out.push(*class);
				out.push(*desc);
			}
			Entry::MethodHandle { member, .. } => out.push(*member),
			Entry::MethodType(sig) => out.push(*sig),
			Entry::InvokeDynamic { bsm, desc } => {
				out.push(*bsm);
				out.push(*desc);
			}
			Entry::BootstrapMethod { bsm, args } => {
				out.push(*bsm);
				out.extend_from_slice(args);
			}
		}
	}

	/// Argument slot count of a method descriptor, longs and doubles
	/// counting double; drives the `invokeinterface` count byte.
	pub fn method_arg_slots(&self, desc: EntryRef) -> Result<u32> {
		let Entry::NameAndType { typ, .. } = self.entry(desc) else {
			bail!("pool entry not Descr: {:?}", self.tag_of(desc));
		};
		let text = match self.entry(*typ) {
			Entry::Signature { erased, .. } => self.utf8_text(*erased)?,
			Entry::Utf8(s) => s.as_java_str(),
			e => bail!("descriptor type is not a signature: {:?}", e.tag()),
		};
		let bytes = text.as_bytes();
		if bytes.first() != Some(&b'(') {
			bail!("not a method descriptor: {text}");
		}
		let mut slots = 0;
		let mut i = 1;
		while i < bytes.len() && bytes[i] != b')' {
			match bytes[i] {
				b'J' | b'D' => {
					slots += 2;
					i += 1;
				}
				b'[' => {
					while i < bytes.len() && bytes[i] == b'[' {
						i += 1;
					}
					if bytes.get(i) == Some(&b'L') {
						while i < bytes.len() && bytes[i] != b';' {
							i += 1;
						}
					}
					slots += 1;
					i += 1;
				}
				b'L' => {
					while i < bytes.len() && bytes[i] != b';' {
						i += 1;
					}
					slots += 1;
					i += 1;
				}
				_ => {
					slots += 1;
					i += 1;
				}
			}
		}
		Ok(slots)
	}
}

#[cfg(test)]
mod testing {
	use pretty_assertions::assert_eq;
	use super::*;

	fn pool_with_signature(form: &str, classes: &[&str]) -> (Pool, EntryRef) {
		let mut pool = Pool::new();
		let form = pool.utf8_str(form);
		let classes = classes
			.iter()
			.map(|c| pool.class_named(JavaStr::from_str(*c).to_owned()))
			.collect();
		let sig = pool.make_signature(form, classes).unwrap();
		(pool, sig)
	}

	#[test]
	fn interning_is_structural() {
		let mut pool = Pool::new();
		let a = pool.utf8_str("java/lang/Object");
		let b = pool.utf8_str("java/lang/Object");
		assert_eq!(a, b);
		assert_ne!(a, pool.utf8_str("java/lang/String"));
	}

	#[test]
	fn signature_erasure_splices_class_names() {
		let (pool, sig) = pool_with_signature("(L;L;)V", &["java/lang/String", "java/util/List"]);
		let erased = pool.erased_utf8(sig).unwrap();
		assert_eq!(
			pool.utf8_text(erased).unwrap(),
			"(Ljava/lang/String;Ljava/util/List;)V"
		);
	}

	#[test]
	fn class_part_counting() {
		let mut pool = Pool::new();
		let form = pool.utf8_str("(L;IL;)L;");
		assert_eq!(pool.count_class_parts(form).unwrap(), 3);
	}

	#[test]
	fn arg_slot_counting() {
		let (mut pool, sig) = pool_with_signature("(IL;J[[D)V", &["java/lang/String"]);
		let name = pool.utf8_str("m");
		let desc = pool.intern(Entry::NameAndType { name, typ: sig });
		assert_eq!(pool.method_arg_slots(desc).unwrap(), 5);
	}

	#[test]
	fn group_tag_resolution_concatenates_pools() {
		let mut pool = Pool::new();
		let i = pool.intern(Entry::Int(7));
		let f = pool.intern(Entry::Float(1.5f32.to_bits()));
		pool.init_tag_index(Tag::Int, vec![i]);
		pool.init_tag_index(Tag::Float, vec![f]);
		assert_eq!(pool.entry_by_tag_index(Tag::LoadableValue, 0).unwrap(), i);
		assert_eq!(pool.entry_by_tag_index(Tag::LoadableValue, 1).unwrap(), f);
		assert!(pool.entry_by_tag_index(Tag::LoadableValue, 2).is_err());
	}
}
