//! Conversions from the UTF-16 code units carried by the `cp_Utf8` bands
//! into [`JavaString`]s.
//!
//! Class file strings may contain unpaired surrogates, so the pool cannot
//! use [`String`]. The band decoder assembles code units and funnels them
//! through Java's modified UTF-8, which represents every code unit,
//! surrogate halves included, in one to three bytes.

use anyhow::{anyhow, Context, Result};
use java_string::JavaString;

/// Encodes one UTF-16 code unit as modified UTF-8.
fn push_code_unit(vec: &mut Vec<u8>, u: u16) {
	match u {
		0x0001..=0x007f => vec.push(u as u8),
		0x0000 | 0x0080..=0x07ff => {
			vec.push(0b1100_0000 | (u >> 6) as u8);
			vec.push(0b1000_0000 | (u & 0x3f) as u8);
		}
		_ => {
			vec.push(0b1110_0000 | (u >> 12) as u8);
			vec.push(0b1000_0000 | ((u >> 6) & 0x3f) as u8);
			vec.push(0b1000_0000 | (u & 0x3f) as u8);
		}
	}
}

/// Takes in a slice of UTF-16 code units, builds a [`JavaString`].
pub(crate) fn from_code_units(units: &[u16]) -> Result<JavaString> {
	let mut vec = Vec::with_capacity(units.len());
	for &u in units {
		push_code_unit(&mut vec, u);
	}
	JavaString::from_modified_utf8(vec).with_context(|| anyhow!("invalid java utf8 contents"))
}

#[cfg(test)]
mod testing {
	use anyhow::Result;
	use java_string::JavaStr;
	use pretty_assertions::assert_eq;
	use super::from_code_units;

	#[test]
	fn ascii() -> Result<()> {
		let units: Vec<u16> = "java/lang/Object".encode_utf16().collect();
		assert_eq!(from_code_units(&units)?, JavaStr::from_str("java/lang/Object"));
		Ok(())
	}

	#[test]
	fn zero_uses_two_bytes() -> Result<()> {
		assert_eq!(from_code_units(&[0, 0x41])?, JavaStr::from_str("\0A"));
		Ok(())
	}

	#[test]
	fn surrogate_pair_survives() -> Result<()> {
		let mut units = [0u16; 2];
		"\u{1f600}".encode_utf16().zip(units.iter_mut()).for_each(|(u, slot)| *slot = u);
		assert_eq!(from_code_units(&units)?, JavaStr::from_str("\u{1f600}"));
		Ok(())
	}

	#[test]
	fn unpaired_surrogate_survives() -> Result<()> {
		let s = from_code_units(&[0xd800, 0x41])?;
		assert_eq!(s.as_java_str().to_modified_utf8().as_ref(), &[0xed_u8, 0xa0, 0x80, 0x41][..]);
		Ok(())
	}
}
