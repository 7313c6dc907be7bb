//! Typed archive columns.
//!
//! A band goes through three states: *sized* (its length has been derived
//! from previously read values), *filled* (exactly that many coded values
//! were pulled off the stream) and *consumed* (every value was handed to a
//! caller, asserted by [`IntBand::done_disbursing`]). Filling materializes
//! the decoded values, so a band can be replayed cheaply: a second pass
//! just rewinds the cursor.

use std::io::Read;

use anyhow::{anyhow, bail, Context, Result};

use crate::coding::{self, Coding, BYTE1};
use crate::constants::Tag;
use crate::limit::LimitedBuffer;
use crate::pool::{EntryRef, Pool};

/// The `band_headers` bytes, consumed specifier by specifier as escaped
/// bands are read.
#[derive(Default)]
pub struct BandHeaders {
	bytes: Vec<u8>,
	pos: usize,
}

impl BandHeaders {
	pub fn new(bytes: Vec<u8>) -> BandHeaders {
		BandHeaders { bytes, pos: 0 }
	}

	fn resolve(&mut self, spec: u8, default: Coding) -> Result<Coding> {
		coding::meta_coding(spec, default, &self.bytes, &mut self.pos)
	}
}

/// A column of integers, decoded through this band's coding.
pub struct IntBand {
	name: String,
	coding: Coding,
	/// Header bands are read before `band_headers` exists and never escape.
	meta_ok: bool,
	expected: usize,
	values: Vec<i32>,
	cursor: usize,
	filled: bool,
}

impl IntBand {
	pub fn new(name: impl Into<String>, coding: Coding) -> IntBand {
		IntBand {
			name: name.into(),
			coding,
			meta_ok: true,
			expected: 0,
			values: Vec::new(),
			cursor: 0,
			filled: false,
		}
	}

	/// A band of the archive header, read before `band_headers` is known;
	/// its values are decoded with the default coding unconditionally.
	pub fn no_meta(name: impl Into<String>, coding: Coding) -> IntBand {
		let mut band = IntBand::new(name, coding);
		band.meta_ok = false;
		band
	}

	pub fn name(&self) -> &str {
		&self.name
	}

	pub fn expect_length(&mut self, n: usize) {
		debug_assert!(!self.filled, "{} already filled", self.name);
		self.expected = n;
	}

	pub fn expect_more_length(&mut self, n: usize) {
		debug_assert!(!self.filled, "{} already filled", self.name);
		self.expected += n;
	}

	/// Pulls exactly the expected number of values off the stream. A band
	/// whose default coding is multi-byte may open with an escape value
	/// selecting a different coding from the `band_headers`.
	pub fn read_from(
		&mut self,
		input: &mut LimitedBuffer<impl Read>,
		headers: &mut BandHeaders,
	) -> Result<()> {
		debug_assert!(!self.filled, "{} read twice", self.name);
		self.filled = true;
		let len = self.expected;
		if len == 0 {
			return Ok(());
		}
		(|| -> Result<()> {
			if self.coding.b == 1 || !self.meta_ok {
				self.values = self.coding.read_band(input, len)?;
				return Ok(());
			}
			let first = self.coding.read_raw(input)?;
			match self.coding.escape_specifier(first) {
				Some(spec) => {
					let coding = headers.resolve(spec, self.coding)?;
					self.values = coding.read_band(input, len)?;
				}
				None => {
					self.values = self.coding.read_band_after(input, len, first)?;
				}
			}
			Ok(())
		})()
		.with_context(|| anyhow!("while reading band {} (length {})", self.name, len))
	}

	pub fn get_int(&mut self) -> Result<i32> {
		let v = self
			.values
			.get(self.cursor)
			.copied()
			.ok_or_else(|| anyhow!("band {} exhausted after {} values", self.name, self.cursor))?;
		self.cursor += 1;
		Ok(v)
	}

	/// `get_int`, checked non-negative and widened, for values used as counts.
	pub fn get_len(&mut self) -> Result<usize> {
		let v = self.get_int()?;
		usize::try_from(v).map_err(|_| anyhow!("band {} holds negative count {}", self.name, v))
	}

	/// Sum of the whole band, regardless of the cursor.
	pub fn int_total(&self) -> i64 {
		self.values.iter().map(|&v| v as i64).sum()
	}

	pub fn len_total(&self) -> Result<usize> {
		usize::try_from(self.int_total())
			.map_err(|_| anyhow!("band {} holds a negative total", self.name))
	}

	/// Number of occurrences of `v` in the whole band.
	pub fn int_count(&self, v: i32) -> usize {
		self.values.iter().filter(|&&x| x == v).count()
	}

	pub fn reset_for_second_pass(&mut self) {
		self.cursor = 0;
	}

	pub fn done_disbursing(&mut self) -> Result<()> {
		if self.cursor != self.values.len() {
			bail!(
				"band {} not fully consumed: {} of {} values disbursed",
				self.name,
				self.cursor,
				self.values.len()
			);
		}
		Ok(())
	}

	/// For bands whose owning structure turned out empty in this archive.
	pub fn done_with_unused_band(&mut self) -> Result<()> {
		if self.expected != 0 || !self.values.is_empty() {
			bail!("band {} expected to stay empty", self.name);
		}
		self.filled = true;
		Ok(())
	}
}

/// A column of raw octets (`BYTE1`; never escaped to another coding).
pub struct ByteBand {
	band: IntBand,
}

impl ByteBand {
	pub fn new(name: &'static str) -> ByteBand {
		ByteBand { band: IntBand::new(name, BYTE1) }
	}

	pub fn expect_length(&mut self, n: usize) {
		self.band.expect_length(n);
	}

	pub fn expect_more_length(&mut self, n: usize) {
		self.band.expect_more_length(n);
	}

	pub fn read_from(
		&mut self,
		input: &mut LimitedBuffer<impl Read>,
		headers: &mut BandHeaders,
	) -> Result<()> {
		self.band.read_from(input, headers)
	}

	pub fn get_byte(&mut self) -> Result<u8> {
		Ok(self.band.get_int()? as u8)
	}

	pub fn len(&self) -> usize {
		self.band.values.len()
	}

	pub fn done_disbursing(&mut self) -> Result<()> {
		self.band.done_disbursing()
	}
}

/// An [`IntBand`] whose values index a constant pool, under the usual
/// biasing convention: on a nullable band, zero is null and everything
/// else is shifted up by one.
pub struct RefBand {
	band: IntBand,
	tag: Tag,
	null_ok: bool,
}

impl RefBand {
	pub fn new(name: impl Into<String>, coding: Coding, tag: Tag) -> RefBand {
		RefBand { band: IntBand::new(name, coding), tag, null_ok: false }
	}

	pub fn nullable(name: impl Into<String>, coding: Coding, tag: Tag) -> RefBand {
		RefBand { band: IntBand::new(name, coding), tag, null_ok: true }
	}

	pub fn name(&self) -> &str {
		&self.band.name
	}

	pub fn expect_length(&mut self, n: usize) {
		self.band.expect_length(n);
	}

	pub fn expect_more_length(&mut self, n: usize) {
		self.band.expect_more_length(n);
	}

	pub fn read_from(
		&mut self,
		input: &mut LimitedBuffer<impl Read>,
		headers: &mut BandHeaders,
	) -> Result<()> {
		self.band.read_from(input, headers)
	}

	pub fn get_ref_opt(&mut self, pool: &Pool) -> Result<Option<EntryRef>> {
		let raw = self.band.get_int()?;
		let n = if self.null_ok { raw - 1 } else { raw };
		if self.null_ok && n == -1 {
			return Ok(None);
		}
		let e = pool
			.entry_by_tag_index(self.tag, n)
			.with_context(|| anyhow!("while resolving band {}", self.band.name))?;
		Ok(Some(e))
	}

	pub fn get_ref(&mut self, pool: &Pool) -> Result<EntryRef> {
		self.get_ref_opt(pool)?
			.ok_or_else(|| anyhow!("unexpected null reference in band {}", self.band.name))
	}

	/// Resolves against a tag decided at disbursing time rather than the
	/// band's declared tag; the `ConstantValue` pool depends on the field.
	pub fn get_ref_with_tag(&mut self, pool: &Pool, tag: Tag) -> Result<EntryRef> {
		let raw = self.band.get_int()?;
		let n = if self.null_ok { raw - 1 } else { raw };
		pool.entry_by_tag_index(tag, n)
			.with_context(|| anyhow!("while resolving band {}", self.band.name))
	}

	/// Resolves against an explicit entry list instead of the band's tag;
	/// used where the referent set depends on decoder state, like the
	/// members of the current class.
	pub fn get_ref_using(&mut self, index: &[EntryRef]) -> Result<EntryRef> {
		let raw = self.band.get_int()?;
		let n = if self.null_ok { raw - 1 } else { raw };
		usize::try_from(n)
			.ok()
			.and_then(|n| index.get(n).copied())
			.ok_or_else(|| {
				anyhow!("reference {} out of range {} in band {}", n, index.len(), self.band.name)
			})
	}

	pub fn done_disbursing(&mut self) -> Result<()> {
		self.band.done_disbursing()
	}

	pub fn done_with_unused_band(&mut self) -> Result<()> {
		self.band.done_with_unused_band()
	}

	pub fn reset_for_second_pass(&mut self) {
		self.band.reset_for_second_pass();
	}
}

#[cfg(test)]
mod testing {
	use pretty_assertions::assert_eq;
	use super::*;
	use crate::coding::{DELTA5, UNSIGNED5};

	fn buffered(bytes: &[u8]) -> LimitedBuffer<&[u8]> {
		LimitedBuffer::new(bytes)
	}

	#[test]
	fn sized_filled_consumed() -> Result<()> {
		let mut b = IntBand::new("test", UNSIGNED5);
		b.expect_length(3);
		b.read_from(&mut buffered(&[7, 8, 9]), &mut BandHeaders::default())?;
		assert_eq!(b.get_int()?, 7);
		assert_eq!(b.int_total(), 24);
		assert!(b.done_disbursing().is_err());
		assert_eq!(b.get_int()?, 8);
		assert_eq!(b.get_int()?, 9);
		b.done_disbursing()?;
		assert!(b.get_int().is_err());
		Ok(())
	}

	#[test]
	fn second_pass_rewinds_without_rereading() -> Result<()> {
		let mut b = IntBand::new("test", DELTA5);
		b.expect_length(2);
		b.read_from(&mut buffered(&[2, 2]), &mut BandHeaders::default())?;
		assert_eq!((b.get_int()?, b.get_int()?), (1, 2));
		b.reset_for_second_pass();
		assert_eq!((b.get_int()?, b.get_int()?), (1, 2));
		b.done_disbursing()
	}

	#[test]
	fn escape_switches_coding() -> Result<()> {
		// A leading value of 192 (encoded [192, 0]) escapes to specifier
		// 0: the default coding, spelled out. The band data follows.
		let mut b = IntBand::new("test", UNSIGNED5);
		b.expect_length(2);
		b.read_from(&mut buffered(&[192, 0, 5, 6]), &mut BandHeaders::default())?;
		assert_eq!((b.get_int()?, b.get_int()?), (5, 6));
		Ok(())
	}

	#[test]
	fn escape_to_canonical_coding() -> Result<()> {
		// A leading value of 193 selects canonical coding 1, BYTE1: two
		// raw bytes follow.
		let mut b = IntBand::new("test", UNSIGNED5);
		b.expect_length(2);
		b.read_from(&mut buffered(&[193, 0, 250, 251]), &mut BandHeaders::default())?;
		assert_eq!((b.get_int()?, b.get_int()?), (250, 251));
		Ok(())
	}
}
