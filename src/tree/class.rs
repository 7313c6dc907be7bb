//! A class under reconstruction: its symbolic header, members, attributes,
//! inner-class tuples and, after the post-pass, its local constant pool.

use java_string::{JavaStr, JavaString};

use crate::pool::EntryRef;
use crate::tree::attribute::Attribute;
use crate::tree::member::{Field, Method};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InnerClass {
	pub this_class: EntryRef,
	pub outer_class: Option<EntryRef>,
	pub name: Option<EntryRef>,
	pub flags: u32,
}

#[derive(Debug)]
pub struct Class {
	pub flags: u16,
	pub this_class: EntryRef,
	/// `None` for `java/lang/Object` and module-infos; the archive encodes
	/// that as `super == this`.
	pub super_class: Option<EntryRef>,
	pub interfaces: Vec<EntryRef>,
	pub version: (u16, u16),
	pub attributes: Vec<Attribute>,
	pub fields: Vec<Field>,
	pub methods: Vec<Method>,
	/// The class's own `InnerClasses` tuples; `None` while the attribute
	/// is absent.
	pub inner_classes: Option<Vec<InnerClass>>,
	pub bootstrap_methods: Vec<EntryRef>,
	/// Index of the class's file in the package file list.
	pub file: Option<usize>,
	/// Slot 0 unused; the second slot of a double-word entry is `None`.
	pub local_cp: Vec<Option<EntryRef>>,
}

impl Class {
	pub fn new(
		this_class: EntryRef,
		super_class: Option<EntryRef>,
		interfaces: Vec<EntryRef>,
	) -> Class {
		Class {
			flags: 0,
			this_class,
			super_class,
			interfaces,
			version: (0, 0),
			attributes: Vec::new(),
			fields: Vec::new(),
			methods: Vec::new(),
			inner_classes: None,
			bootstrap_methods: Vec::new(),
			file: None,
			local_cp: Vec::new(),
		}
	}

	pub fn attribute(&self, layout: crate::layout::LayoutHandle) -> Option<usize> {
		self.attributes.iter().position(|a| a.layout == layout)
	}
}

/// Splits an inner-class name of the form `(pkg/)*outer($number)?($name)?`
/// into `(outer, number, name)`. Names that do not follow the convention
/// are unpredictable and need a long-form tuple.
pub fn parse_inner_class_name(n: &JavaStr) -> Option<(Option<JavaString>, Option<JavaString>, Option<JavaString>)> {
	let bytes = n.as_bytes();
	let pkg_len = bytes.iter().rposition(|&b| b == b'/').map_or(0, |i| i + 1);
	let last_dollar_before = |end: usize| bytes[..end].iter().rposition(|&b| b == b'$');
	let is_digits = |range: std::ops::Range<usize>| {
		!range.is_empty() && bytes[range].iter().all(|b| b.is_ascii_digit())
	};
	let slice = |range: std::ops::Range<usize>| {
		JavaString::from_semi_utf8(bytes[range].to_vec()).ok()
	};

	let dollar2 = last_dollar_before(bytes.len())?;
	if dollar2 < pkg_len {
		return None;
	}
	let (dollar1, number, name);
	if is_digits(dollar2 + 1..bytes.len()) {
		// (pkg/)*outer$number
		number = slice(dollar2 + 1..bytes.len());
		name = None;
		dollar1 = dollar2;
	} else {
		match last_dollar_before(dollar2) {
			Some(d1) if d1 >= pkg_len && is_digits(d1 + 1..dollar2) => {
				// (pkg/)*outer$number$name
				name = slice(dollar2 + 1..bytes.len());
				number = slice(d1 + 1..dollar2);
				dollar1 = d1;
			}
			_ => {
				// (pkg/)*outer$name
				name = slice(dollar2 + 1..bytes.len());
				number = None;
				dollar1 = dollar2;
			}
		}
	}
	let outer = if dollar1 == 0 { None } else { slice(0..dollar1) };
	Some((outer, number, name))
}

/// The source file name a class "obviously" has: outermost simple name
/// plus `.java`.
pub fn obvious_source_file(class_name: &JavaStr) -> JavaString {
	let bytes = class_name.as_bytes();
	let start = bytes.iter().rposition(|&b| b == b'/').map_or(0, |i| i + 1);
	let end = bytes[start..]
		.iter()
		.position(|&b| b == b'$')
		.map_or(bytes.len(), |i| start + i);
	let mut out = bytes[start..end].to_vec();
	out.extend_from_slice(b".java");
	JavaString::from_semi_utf8(out).expect("substring of a valid name")
}

#[cfg(test)]
mod testing {
	use java_string::JavaStr;
	use pretty_assertions::assert_eq;
	use super::*;

	fn parse(n: &str) -> Option<(Option<String>, Option<String>, Option<String>)> {
		parse_inner_class_name(JavaStr::from_str(n))
			.map(|(a, b, c)| (a.map(|s| s.to_string()), b.map(|s| s.to_string()), c.map(|s| s.to_string())))
	}

	#[test]
	fn member_class() {
		assert_eq!(
			parse("java/util/Map$Entry"),
			Some((Some("java/util/Map".into()), None, Some("Entry".into())))
		);
	}

	#[test]
	fn anonymous_class() {
		assert_eq!(parse("a/B$1"), Some((Some("a/B".into()), Some("1".into()), None)));
	}

	#[test]
	fn local_class() {
		assert_eq!(
			parse("a/B$1$Local"),
			Some((Some("a/B".into()), Some("1".into()), Some("Local".into())))
		);
	}

	#[test]
	fn plain_name_is_unpredictable() {
		assert_eq!(parse("java/lang/Object"), None);
	}

	#[test]
	fn obvious_source_files() {
		assert_eq!(obvious_source_file(JavaStr::from_str("a/b/C")).to_string(), "C.java");
		assert_eq!(obvious_source_file(JavaStr::from_str("a/b/C$D$1")).to_string(), "C.java");
	}
}
