//! The `file_bands` group and the trailing file bits.

use std::io::Read;

use anyhow::{bail, Result};
use log::debug;

use crate::constants::archive_options::{
	AO_HAVE_FILE_MODTIME, AO_HAVE_FILE_OPTIONS, AO_HAVE_FILE_SIZE_HI,
};
use crate::constants::file_options::FO_IS_CLASS_STUB;
use crate::error::UnpackError;
use crate::pool::EntryRef;
use crate::reader::ArchiveReader;
use crate::tree::file::File;

impl<R: Read> ArchiveReader<R> {
	pub(crate) fn read_files(&mut self) -> Result<()> {
		let n = self.num_files;
		debug!("building {} files", n);
		let have_size_hi = self.test_option(AO_HAVE_FILE_SIZE_HI);
		let have_modtime = self.test_option(AO_HAVE_FILE_MODTIME);
		let have_options = self.test_option(AO_HAVE_FILE_OPTIONS);

		self.bands.file_name.expect_length(n);
		self.bands.file_size_lo.expect_length(n);
		if have_size_hi {
			self.bands.file_size_hi.expect_length(n);
		}
		if have_modtime {
			self.bands.file_modtime.expect_length(n);
		}
		if have_options {
			self.bands.file_options.expect_length(n);
		}
		self.bands.file_name.read_from(&mut self.input, &mut self.headers)?;
		self.bands.file_size_hi.read_from(&mut self.input, &mut self.headers)?;
		self.bands.file_size_lo.read_from(&mut self.input, &mut self.headers)?;
		self.bands.file_modtime.read_from(&mut self.input, &mut self.headers)?;
		self.bands.file_options.read_from(&mut self.input, &mut self.headers)?;

		// Compute every length before touching any file bits.
		let mut lengths = Vec::with_capacity(n);
		let mut total: u64 = 0;
		for _ in 0..n {
			let mut size = self.bands.file_size_lo.get_int()? as u32 as u64;
			if have_size_hi {
				size += (self.bands.file_size_hi.get_int()? as u32 as u64) << 32;
			}
			lengths.push(size);
			total += size;
		}
		if let Some(limit) = self.input.read_limit() {
			if limit != total {
				bail!(UnpackError::SizeMismatch {
					expected: limit,
					served: total,
				});
			}
		}

		let mut next_class = 0usize;
		for &size in &lengths {
			let name = self.bands.file_name.get_ref(&self.pkg.pool)?;
			let mut modtime = self.pkg.default_modtime;
			let mut options = self.pkg.default_file_options;
			if have_modtime {
				modtime = modtime.wrapping_add(self.bands.file_modtime.get_int()?);
			}
			if have_options {
				options |= self.bands.file_options.get_int()? as u32;
			}
			let mut bytes = vec![0u8; usize::try_from(size)?];
			let got = self.input.read(&mut bytes)?;
			if got as u64 != size {
				bail!(UnpackError::TruncatedStream);
			}
			let file = File { name, modtime, options, bytes };
			let is_stub = file.is_class_stub(&self.pkg.pool);
			self.pkg.files.push(file);
			if is_stub {
				// In declaration order, stubs bind to still-unbound classes.
				if next_class >= self.pkg.classes.len() {
					bail!("more class file stubs than classes");
				}
				self.pkg.classes[next_class].file = Some(self.pkg.files.len() - 1);
				next_class += 1;
			}
		}

		// Classes without a stub get a synthesized empty file.
		for c in next_class..self.pkg.classes.len() {
			let name = self.canonical_class_file_name(c)?;
			self.pkg.files.push(File {
				name,
				modtime: self.pkg.default_modtime,
				options: self.pkg.default_file_options | FO_IS_CLASS_STUB,
				bytes: Vec::new(),
			});
			self.pkg.classes[c].file = Some(self.pkg.files.len() - 1);
		}

		self.bands.file_name.done_disbursing()?;
		self.bands.file_size_hi.done_disbursing()?;
		self.bands.file_size_lo.done_disbursing()?;
		self.bands.file_modtime.done_disbursing()?;
		self.bands.file_options.done_disbursing()?;

		self.check_archive_size()
	}

	fn canonical_class_file_name(&mut self, c: usize) -> Result<EntryRef> {
		let mut name = self
			.pkg
			.pool
			.class_name(self.pkg.classes[c].this_class)?
			.as_bytes()
			.to_vec();
		name.extend_from_slice(b".class");
		let name = java_string::JavaString::from_semi_utf8(name)
			.map_err(|e| anyhow::anyhow!("bad class name bytes: {e}"))?;
		Ok(self.pkg.pool.utf8(name))
	}
}
