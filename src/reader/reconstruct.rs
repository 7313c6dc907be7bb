//! The post-pass over each class: version folding, source file
//! expansion, inner-class reconciliation and the local constant pool.

use std::cmp::Ordering;
use std::io::Read;

use anyhow::{bail, Result};
use indexmap::IndexSet;
use log::trace;

use crate::constants::Tag;
use crate::pool::EntryRef;
use crate::reader::ArchiveReader;
use crate::tree::attribute::Attribute;
use crate::tree::class::{obvious_source_file, InnerClass};

impl<R: Read> ArchiveReader<R> {
	pub(crate) fn reconstruct_class(&mut self, c: usize) -> Result<()> {
		trace!("reconstructing class {}", c);

		// A local class-file version attribute overrides the default.
		let version_handle = self.attr_defs().class_file_version;
		if let Some(j) = self.pkg.classes[c].attribute(version_handle) {
			let attr = self.pkg.classes[c].attributes.remove(j);
			let &[minor_hi, minor_lo, major_hi, major_lo] = &attr.bytes[..] else {
				bail!("malformed class-file version attribute");
			};
			let minor = u16::from_be_bytes([minor_hi, minor_lo]);
			let major = u16::from_be_bytes([major_hi, major_lo]);
			self.pkg.classes[c].version = (major, minor);
		} else {
			self.pkg.classes[c].version = self.pkg.default_class_version;
		}

		self.expand_source_file(c)?;

		let local_cp = self.reconstruct_local_cp(c)?;
		self.pkg.classes[c].local_cp = local_cp;
		Ok(())
	}

	/// A `SourceFile` attribute with a null reference stands for the
	/// "obvious" name derived from the class name.
	fn expand_source_file(&mut self, c: usize) -> Result<()> {
		let handle = self.attr_defs().source_file;
		let Some(j) = self.pkg.classes[c].attribute(handle) else {
			return Ok(());
		};
		if !self.pkg.classes[c].attributes[j].fixups.is_empty() {
			return Ok(());
		}
		let name = obvious_source_file(self.pkg.pool.class_name(self.pkg.classes[c].this_class)?);
		let entry = self.pkg.pool.utf8(name);
		self.pkg.classes[c].attributes[j].fixups.add_u2(0, entry);
		Ok(())
	}

	fn reconstruct_local_cp(&mut self, c: usize) -> Result<Vec<Option<EntryRef>>> {
		let mut cp_refs: IndexSet<EntryRef> = IndexSet::new();
		self.visit_class_refs(c, &mut cp_refs);
		let mut bsms: IndexSet<EntryRef> = IndexSet::new();
		self.complete_refs(&mut cp_refs, &mut bsms)?;

		// Reconcile the inner-class view now that the references are
		// known. A positive change only adds tuples; a negative one
		// deleted some, which invalidates the reference set.
		match self.expand_local_ics(c)? {
			n if n > 0 => {
				self.visit_inner_class_refs(c, &mut cp_refs);
				self.complete_refs(&mut cp_refs, &mut bsms)?;
			}
			n if n < 0 => {
				cp_refs.clear();
				self.visit_class_refs(c, &mut cp_refs);
				self.complete_refs(&mut cp_refs, &mut bsms)?;
			}
			_ => {}
		}

		if !bsms.is_empty() {
			let handle = self.attr_defs().bootstrap_methods;
			let name_ref = self.attr_defs().get(handle).name_ref;
			if self.pkg.classes[c].attribute(handle).is_none() {
				self.pkg.classes[c].attributes.push(Attribute::canonical(handle, name_ref));
			}
			cp_refs.insert(name_ref);
			let mut list: Vec<EntryRef> = bsms.into_iter().collect();
			list.sort_by(|&a, &b| self.unindexed_order(a, b));
			self.pkg.classes[c].bootstrap_methods = list;
		}

		// Narrow ldc referents go first; their indexes must stay in one
		// byte. Everything else follows, both regions in output order.
		let empty = IndexSet::new();
		let ldc_refs = self.ldc_refs.get(&c).unwrap_or(&empty);
		debug_assert!(ldc_refs.iter().all(|r| cp_refs.contains(r)));
		let mut narrow: Vec<EntryRef> = ldc_refs.iter().copied().collect();
		let mut wide: Vec<EntryRef> =
			cp_refs.iter().copied().filter(|r| !ldc_refs.contains(r)).collect();
		narrow.sort_by(|&a, &b| self.output_order(a, b));
		wide.sort_by(|&a, &b| self.output_order(a, b));

		let mut local = Vec::with_capacity(1 + narrow.len() + wide.len());
		local.push(None);
		for e in narrow.into_iter().chain(wide) {
			local.push(Some(e));
			if self.pkg.pool.is_double_word(e) {
				// double-word entries burn the following slot
				local.push(None);
			}
		}
		Ok(local)
	}

	/// Entries with an archive pool position sort by it and come first;
	/// the rest fall back to tag and spelling.
	fn output_order(&self, a: EntryRef, b: EntryRef) -> Ordering {
		let ka = self.pkg.pool.output_index(a, &self.utf8_signatures);
		let kb = self.pkg.pool.output_index(b, &self.utf8_signatures);
		match (ka, kb) {
			(Some(x), Some(y)) => x.cmp(&y),
			(Some(_), None) => Ordering::Less,
			(None, Some(_)) => Ordering::Greater,
			(None, None) => self.unindexed_order(a, b),
		}
	}

	fn unindexed_order(&self, a: EntryRef, b: EntryRef) -> Ordering {
		let pool = &self.pkg.pool;
		(pool.tag_of(a), pool.describe(a)).cmp(&(pool.tag_of(b), pool.describe(b)))
	}

	/// All pool entries a class refers to directly, as a class file
	/// would: header refs, member descriptors, attribute names, fixup
	/// targets, handler classes and inner-class tuples.
	fn visit_class_refs(&self, c: usize, refs: &mut IndexSet<EntryRef>) {
		fn visit_attrs(attrs: &[Attribute], refs: &mut IndexSet<EntryRef>) {
			for a in attrs {
				refs.insert(a.name);
				refs.extend(a.fixups.entries());
			}
		}
		let cls = &self.pkg.classes[c];
		refs.insert(cls.this_class);
		refs.extend(cls.super_class);
		refs.extend(cls.interfaces.iter().copied());
		self.visit_inner_class_refs(c, refs);
		for f in &cls.fields {
			refs.insert(f.descriptor);
			visit_attrs(&f.attributes, refs);
		}
		for m in &cls.methods {
			refs.insert(m.descriptor);
			visit_attrs(&m.attributes, refs);
			if let Some(code) = &m.code {
				for h in &code.handlers {
					refs.extend(h.class);
				}
				refs.extend(code.fixups.entries());
				visit_attrs(&code.attributes, refs);
			}
		}
		visit_attrs(&cls.attributes, refs);
	}

	fn visit_inner_class_refs(&self, c: usize, refs: &mut IndexSet<EntryRef>) {
		let Some(ics) = &self.pkg.classes[c].inner_classes else {
			return;
		};
		if ics.is_empty() {
			return;
		}
		let ic_handle = self.attr_defs().inner_classes;
		refs.insert(self.attr_defs().get(ic_handle).name_ref);
		for ic in ics {
			refs.insert(ic.this_class);
			refs.extend(ic.outer_class);
			refs.extend(ic.name);
		}
	}

	/// Closes the set over entry children. Signatures are replaced by
	/// their erased Utf8 spelling; bootstrap methods move out into their
	/// own list, their handle and arguments staying in.
	fn complete_refs(
		&self,
		refs: &mut IndexSet<EntryRef>,
		bsms: &mut IndexSet<EntryRef>,
	) -> Result<()> {
		let pool = &self.pkg.pool;
		let mut work: Vec<EntryRef> = refs.iter().copied().collect();
		let mut children = Vec::new();
		while let Some(e) = work.pop() {
			if pool.tag_of(e) == Tag::Signature {
				refs.shift_remove(&e);
				let erased = pool.erased_utf8(e)?;
				if refs.insert(erased) {
					work.push(erased);
				}
				continue;
			}
			if pool.tag_of(e) == Tag::BootstrapMethod {
				refs.shift_remove(&e);
				bsms.insert(e);
				// keep walking into the handle and arguments
			} else if !refs.contains(&e) {
				continue;
			}
			children.clear();
			pool.children(e, &mut children);
			for &child in &children {
				if pool.tag_of(child) == Tag::BootstrapMethod {
					if !bsms.contains(&child) {
						work.push(child);
					}
					continue;
				}
				if refs.insert(child) {
					work.push(child);
				}
			}
		}
		Ok(())
	}

	/// Applies the transmitted tuple diff to the globally implied tuples;
	/// the sign of the result says whether tuples were added or deleted
	/// relative to what was transmitted.
	fn expand_local_ics(&mut self, c: usize) -> Result<i32> {
		let implied = self.globally_implied_ics(c)?;
		let local = self.pkg.classes[c].inner_classes.clone();
		let actual = match &local {
			None => implied,
			Some(transmitted) => {
				// the transmitted tuples are a symmetric-difference patch
				let mut out = implied;
				for t in transmitted {
					match out.iter().position(|x| x == t) {
						Some(pos) => {
							out.remove(pos);
						}
						None => out.push(*t),
					}
				}
				out
			}
		};
		let old = local.unwrap_or_default();
		let deleted = old.iter().any(|t| !actual.contains(t));
		let added = actual.iter().any(|t| !old.contains(t));
		let changed = if deleted {
			-1
		} else if added {
			1
		} else {
			0
		};
		self.set_class_inner_classes(c, actual);
		Ok(changed)
	}

	fn set_class_inner_classes(&mut self, c: usize, ics: Vec<InnerClass>) {
		let handle = self.attr_defs().inner_classes;
		let name_ref = self.attr_defs().get(handle).name_ref;
		let present = self.pkg.classes[c].attribute(handle);
		if ics.is_empty() {
			self.pkg.classes[c].inner_classes = None;
			if let Some(j) = present {
				self.pkg.classes[c].attributes.remove(j);
			}
		} else {
			self.pkg.classes[c].inner_classes = Some(ics);
			if present.is_none() {
				self.pkg.classes[c]
					.attributes
					.push(Attribute::canonical(handle, name_ref));
			}
		}
	}

	/// The global tuples a class implies: every referenced class with a
	/// global tuple, closed over the outer-class chain, in global order.
	fn globally_implied_ics(&self, c: usize) -> Result<Vec<InnerClass>> {
		let mut refs = IndexSet::new();
		self.visit_class_refs(c, &mut refs);
		let mut bsms = IndexSet::new();
		self.complete_refs(&mut refs, &mut bsms)?;
		let mut ic_classes: IndexSet<EntryRef> = IndexSet::new();
		for &e in &refs {
			if self.pkg.pool.tag_of(e) != Tag::Class {
				continue;
			}
			let mut cursor = Some(e);
			while let Some(class) = cursor {
				let Some(ic) = self.pkg.global_inner_class(class) else {
					break;
				};
				if !ic_classes.insert(ic.this_class) {
					break;
				}
				cursor = ic.outer_class;
			}
		}
		Ok(self
			.pkg
			.all_inner_classes
			.iter()
			.filter(|ic| ic_classes.contains(&ic.this_class))
			.copied()
			.collect())
	}
}
