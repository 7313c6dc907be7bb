//! Error kinds of the decoder.
//!
//! Everything is fatal: the caller drops the half-built package. The typed
//! kinds below travel inside [`anyhow::Error`], so call sites attach band
//! names and stream offsets via `.context(..)` and callers that care can
//! still `downcast_ref::<UnpackError>()`.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum UnpackError {
	#[error("unexpected archive magic: got {got:#010x}, expected {expected:#010x}")]
	MagicMismatch { got: u32, expected: u32 },

	#[error("unexpected archive version: got {major}.{minor}")]
	UnsupportedVersion { major: u16, minor: u16 },

	#[error("unexpected band {band} in a pre-7.0 archive")]
	LegacyFeatureInOldVersion { band: &'static str },

	#[error("bad attribute layout in archive: {layout:?}")]
	BadLayout { layout: String },

	#[error("unknown attribute index {index} for {context} attribute")]
	BadAttrIndex { index: i32, context: &'static str },

	#[error("unknown band coding specifier {spec}")]
	BadCoding { spec: u8 },

	#[error("illegal reference for opcode {opcode}: expected a {expected} entry, got {got}")]
	OpcodeReferenceTagMismatch {
		opcode: u8,
		expected: &'static str,
		got: &'static str,
	},

	#[error("illegal opcode {opcode}")]
	IllegalOpcode { opcode: u16 },

	#[error("unexpected end of stream")]
	TruncatedStream,

	#[error("predicted archive size {expected} != {served}")]
	SizeMismatch { expected: u64, served: u64 },

	#[error("no skipping on the limited buffer")]
	IllegalSkip,
}
