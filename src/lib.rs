//! # jsonscan
//!
//! SIMD-accelerated structural scanning and string decoding for JSON.
//!
//! This crate implements the first pass of a high-throughput JSON parser:
//! a single branch-free sweep over the input that records the byte offset of
//! every structurally significant position (braces, brackets, colon, comma,
//! and the first byte of each string or primitive), validates UTF-8 along
//! the way, and a lazy second pass that decodes individual strings with all
//! escape sequences resolved.
//!
//! The vectorized classification techniques follow:
//! - Langdale & Lemire, ["Parsing Gigabytes of JSON per Second"](https://arxiv.org/abs/1902.08318) (2019)
//!
//! ## Quick Start
//!
//! ```
//! use jsonscan::{scan, Padded, StructuralIndexes};
//!
//! let input = Padded::from(r#"{"answer": 42}"#);
//! let mut indexes = StructuralIndexes::with_capacity_for(input.len());
//! scan(&input, &mut indexes).unwrap();
//!
//! // `{`, `"answer"`, `:`, `42`, `}` and the end-of-input sentinel.
//! assert_eq!(indexes.as_slice(), &[0, 1, 9, 11, 13, 14]);
//! ```
//!
//! Strings are decoded on demand from their structural offset:
//!
//! ```
//! use jsonscan::{unescape, Padded, StringBuffer};
//!
//! let input = Padded::from(r#""tab\there""#);
//! let mut strings = StringBuffer::new();
//! assert!(unescape(&input, 0, &mut strings));
//! assert_eq!(strings.get(0), Some(&b"tab\there"[..]));
//! ```
//!
//! ## Back-ends
//!
//! Three SIMD back-ends are shipped alongside a portable scalar reference:
//!
//! - [`scan::sse42`]: 16 bytes/register, x86_64 with SSE4.2 + PCLMULQDQ
//! - [`scan::avx2`]: 32 bytes/register, x86_64 with AVX2 + PCLMULQDQ + BMI1
//! - [`scan::neon`]: 16 bytes/register, aarch64 (NEON is mandatory there)
//! - [`scan::scalar`]: portable, used as the fallback and the test oracle
//!
//! The top-level [`scan`] and [`unescape`] entry points pick the widest
//! back-end the CPU supports at runtime; all back-ends produce byte-identical
//! structural offsets, error codes, and decoded strings.

// Use no_std unless the std feature is enabled or we're in test mode
#![cfg_attr(not(any(test, feature = "std")), no_std)]

// When using no_std, we need to explicitly link the alloc crate
#[cfg(not(any(test, feature = "std")))]
extern crate alloc;

// When using std, re-export alloc types from std for compatibility
#[cfg(any(test, feature = "std"))]
extern crate std as alloc;

mod bits;
mod error;
mod index;
mod input;
pub mod scan;
pub mod strings;

pub use error::ScanError;
pub use index::StructuralIndexes;
pub use input::{PADDING, Padded};
pub use scan::scan;
pub use strings::{StringBuffer, unescape};
