//! A buffered byte source which is careful not to read its underlying
//! stream ahead of a declared mark, the read limit. The limit bounds both
//! the header/body region (when the archive declares its size) and the
//! trailing file-bits region.

use std::io::Read;

use anyhow::{bail, Context, Result};

use crate::error::UnpackError;

/// Something bands can pull single bytes from.
pub trait ByteSource {
	fn read_byte(&mut self) -> Result<u8>;
}

const BUF_SIZE: usize = 1 << 14;

pub struct LimitedBuffer<R> {
	inner: R,
	buf: Vec<u8>,
	pos: usize,
	count: usize,
	/// Bytes handed out to callers.
	served: u64,
	/// Bytes pulled from the underlying stream.
	buffered: u64,
	/// Absolute served-byte position reads may not cross, if any.
	limit: Option<u64>,
}

impl<R: Read> LimitedBuffer<R> {
	pub fn new(inner: R) -> LimitedBuffer<R> {
		LimitedBuffer {
			inner,
			buf: vec![0; BUF_SIZE],
			pos: 0,
			count: 0,
			served: 0,
			buffered: 0,
			limit: None,
		}
	}

	/// Total number of bytes returned so far.
	pub fn bytes_served(&self) -> u64 {
		self.served
	}

	/// Declares how many bytes past the current position future reads may
	/// consume; `None` removes the limitation.
	pub fn set_read_limit(&mut self, n: Option<u64>) {
		self.limit = n.map(|n| self.served + n);
	}

	pub fn read_limit(&self) -> Option<u64> {
		self.limit.map(|l| l - self.served)
	}

	pub fn at_limit(&self) -> bool {
		self.limit == Some(self.served)
	}

	/// Offsets for diagnostics: (served, buffered, limit).
	pub fn offsets(&self) -> (u64, u64, Option<u64>) {
		(self.served, self.buffered, self.limit)
	}

	/// The limited buffer never skips; a decoder that would need to has
	/// mis-sized an earlier band.
	pub fn skip(&mut self, _n: u64) -> Result<()> {
		bail!(UnpackError::IllegalSkip)
	}

	fn fill(&mut self) -> Result<usize> {
		debug_assert!(self.pos == self.count);
		let mut want = self.buf.len();
		if let Some(limit) = self.limit {
			let remaining = limit - self.buffered;
			if (want as u64) > remaining {
				want = remaining as usize;
			}
		}
		if want == 0 {
			return Ok(0);
		}
		let n = self
			.inner
			.read(&mut self.buf[..want])
			.context("while refilling the input buffer")?;
		self.buffered += n as u64;
		self.pos = 0;
		self.count = n;
		Ok(n)
	}

	/// Like [`ByteSource::read_byte`], but returns `None` at the end of the
	/// stream or at the read limit.
	pub fn try_read_byte(&mut self) -> Result<Option<u8>> {
		if self.pos == self.count && self.fill()? == 0 {
			return Ok(None);
		}
		let b = self.buf[self.pos];
		self.pos += 1;
		self.served += 1;
		Ok(Some(b))
	}

	/// Reads as many bytes as available into `out`, up to the limit.
	pub fn read(&mut self, out: &mut [u8]) -> Result<usize> {
		let mut filled = 0;
		while filled < out.len() {
			if self.pos == self.count && self.fill()? == 0 {
				break;
			}
			let n = (self.count - self.pos).min(out.len() - filled);
			out[filled..filled + n].copy_from_slice(&self.buf[self.pos..self.pos + n]);
			self.pos += n;
			self.served += n as u64;
			filled += n;
		}
		Ok(filled)
	}
}

impl<R: Read> ByteSource for LimitedBuffer<R> {
	fn read_byte(&mut self) -> Result<u8> {
		match self.try_read_byte()? {
			Some(b) => Ok(b),
			None => bail!(UnpackError::TruncatedStream),
		}
	}
}

/// A plain in-memory source, mostly for tests.
pub struct SliceSource<'a> {
	bytes: &'a [u8],
	pos: usize,
}

impl<'a> SliceSource<'a> {
	pub fn new(bytes: &'a [u8]) -> SliceSource<'a> {
		SliceSource { bytes, pos: 0 }
	}
}

impl ByteSource for SliceSource<'_> {
	fn read_byte(&mut self) -> Result<u8> {
		match self.bytes.get(self.pos) {
			Some(&b) => {
				self.pos += 1;
				Ok(b)
			}
			None => bail!(UnpackError::TruncatedStream),
		}
	}
}

#[cfg(test)]
mod testing {
	use pretty_assertions::assert_eq;
	use super::*;

	#[test]
	fn serves_and_counts() -> Result<()> {
		let mut b = LimitedBuffer::new(&[1u8, 2, 3][..]);
		assert_eq!(b.read_byte()?, 1);
		assert_eq!(b.read_byte()?, 2);
		assert_eq!(b.bytes_served(), 2);
		Ok(())
	}

	#[test]
	fn limit_stops_reads_without_consuming_underlying() -> Result<()> {
		let data = [1u8, 2, 3, 4, 5];
		let mut rest = &data[..];
		{
			let mut b = LimitedBuffer::new(&mut rest);
			b.set_read_limit(Some(2));
			assert_eq!(b.read_byte()?, 1);
			assert_eq!(b.read_byte()?, 2);
			assert!(b.at_limit());
			assert!(b.read_byte().is_err());
		}
		// the wrapped stream was never advanced past the limit
		assert_eq!(rest, &[3, 4, 5]);
		Ok(())
	}

	#[test]
	fn limit_is_relative_to_current_position() -> Result<()> {
		let mut b = LimitedBuffer::new(&[9u8; 10][..]);
		b.read_byte()?;
		b.set_read_limit(Some(4));
		assert_eq!(b.read_limit(), Some(4));
		let mut buf = [0u8; 8];
		assert_eq!(b.read(&mut buf)?, 4);
		assert!(b.at_limit());
		Ok(())
	}

	#[test]
	fn no_skipping() {
		let mut b = LimitedBuffer::new(&[0u8; 4][..]);
		assert!(b.skip(2).is_err());
	}
}
