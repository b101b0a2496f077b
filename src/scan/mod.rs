//! Structural scanning.
//!
//! The scanner sweeps the input in 64-byte blocks. For each block a back-end
//! classifies every byte into bitmaps (one bit per byte, LSB first), the
//! shared algorithm below resolves escape parity and string membership,
//! and the previous block's structural mask is flattened into the output
//! buffer while the current block's quote mask is still in flight.
//!
//! ## Back-end selection
//!
//! - x86_64: [`avx2`] (32-byte registers, AVX2 + PCLMULQDQ + BMI1) when
//!   available, else [`sse42`] (SSE4.2 + PCLMULQDQ), else [`scalar`].
//! - aarch64: [`neon`] (mandatory on aarch64). Lacking a carry-less
//!   multiply, it uses the portable prefix-XOR fold.
//! - anywhere else, or without the `std` feature: [`scalar`].
//!
//! Every back-end produces byte-identical structural offsets, error codes,
//! and decoded strings; the integration suite checks them against each
//! other and against [`scalar`].

use crate::bits;
use crate::error::ScanError;
use crate::index::{INDEX_SLOP, StructuralIndexes, flatten_bits};
#[cfg(any(
    all(target_arch = "x86_64", any(test, feature = "std")),
    target_arch = "aarch64"
))]
use crate::input::Padded;

#[cfg(target_arch = "x86_64")]
pub mod avx2;
#[cfg(target_arch = "aarch64")]
pub mod neon;
pub mod scalar;
#[cfg(target_arch = "x86_64")]
pub mod sse42;

/// Largest document the 32-bit structural offsets can address.
const MAX_DOCUMENT_LEN: usize = u32::MAX as usize - 64;

/// Carry state threaded across 64-byte blocks.
///
/// Exactly one of `prev_in_string == 0` / `prev_in_string == !0` holds after
/// every block; `prev_escaped` is always 0 or 1.
pub(crate) struct ScanState {
    /// Whether the first byte of the next block is escaped by a trailing
    /// odd-length backslash run.
    prev_escaped: u64,
    /// All ones if the previous block ended inside an open string.
    prev_in_string: u64,
    /// Whether the last byte of the previous block was part of a primitive
    /// run.
    prev_primitive: u64,
    /// OR of every control byte (< 0x20) seen inside a string.
    unescaped_error: u64,
    /// The previous block's structural mask, flattened one iteration late.
    structurals: u64,
}

impl ScanState {
    pub(crate) fn new() -> Self {
        Self {
            prev_escaped: 0,
            prev_in_string: 0,
            prev_primitive: 0,
            unescaped_error: 0,
            structurals: 0,
        }
    }
}

/// Per-block classification bitmaps produced by a back-end.
pub(crate) struct Bitmaps {
    /// Bytes equal to `\`.
    pub backslash: u64,
    /// Bytes equal to `"`, before escape filtering.
    pub quote: u64,
    /// Space, tab, newline, carriage return.
    pub whitespace: u64,
    /// The operator set `{ } [ ] , :`.
    pub op: u64,
    /// Bytes at or below 0x1F.
    pub ctrl: u64,
}

/// Prefix-XOR provider: PCLMUL on x86, the log fold elsewhere. Both are
/// bit-for-bit equivalent on all inputs.
pub(crate) trait QuoteMask {
    fn prefix_xor(quotes: u64) -> u64;
}

/// Portable fold provider used by the scalar and NEON back-ends.
pub(crate) struct Fold;

impl QuoteMask for Fold {
    #[inline(always)]
    fn prefix_xor(quotes: u64) -> u64 {
        bits::prefix_xor(quotes)
    }
}

/// Carry-less multiply provider for the x86 back-ends.
#[cfg(target_arch = "x86_64")]
pub(crate) struct Clmul;

#[cfg(target_arch = "x86_64")]
impl QuoteMask for Clmul {
    #[inline(always)]
    fn prefix_xor(quotes: u64) -> u64 {
        // SAFETY: only reachable through the sse42/avx2 back-ends, whose
        // entry points require PCLMULQDQ.
        unsafe { clmul_ones(quotes) }
    }
}

#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "pclmulqdq")]
unsafe fn clmul_ones(quotes: u64) -> u64 {
    use core::arch::x86_64::*;
    unsafe {
        _mm_cvtsi128_si64(_mm_clmulepi64_si128::<0>(
            _mm_set_epi64x(0, quotes as i64),
            _mm_set1_epi8(-1),
        )) as u64
    }
}

/// Process one 64-byte block: resolve string membership, accumulate the
/// control-character error, flatten the *previous* block's structurals, and
/// stash this block's structural mask for the next iteration.
#[inline(always)]
pub(crate) fn scan_block<Q: QuoteMask>(
    maps: Bitmaps,
    idx: usize,
    state: &mut ScanState,
    out: &mut StructuralIndexes,
) {
    let (escaped, prev_escaped) = bits::find_escaped(maps.backslash, state.prev_escaped);
    state.prev_escaped = prev_escaped;
    let quote = maps.quote & !escaped;
    // The quote mask covers the opening quote through the byte before the
    // closing quote; carrying the previous block's sign bit propagates an
    // open string forward.
    let in_string = Q::prefix_xor(quote) ^ state.prev_in_string;
    state.prev_in_string = ((in_string as i64) >> 63) as u64;
    state.unescaped_error |= maps.ctrl & in_string;

    // The deferred flatten soaks up ALU slack while the next block's
    // carry-less multiply is in flight.
    flatten_bits(out, idx as u32, state.structurals);

    let primitive = !(maps.op | maps.whitespace);
    let (follows_primitive, prev_primitive) = bits::follows(primitive, state.prev_primitive);
    state.prev_primitive = prev_primitive;
    let start_primitive = primitive & !follows_primitive;
    // XOR with the quote bits turns the opening quote on and the closing
    // quote off: the opening quote stays structural, contents do not.
    state.structurals = (maps.op | start_primitive) & !(in_string ^ quote);
}

/// Up-front capacity check: the worst case is one offset per input byte,
/// plus the sentinel and the flattener's overshoot.
#[inline]
pub(crate) fn check_capacity(len: usize, out: &StructuralIndexes) -> Result<(), ScanError> {
    if len > MAX_DOCUMENT_LEN || out.capacity() < len + INDEX_SLOP {
        return Err(ScanError::Capacity);
    }
    Ok(())
}

/// Commit to a single error code at end of input, in the fixed reporting
/// order, then append the sentinel.
#[inline]
pub(crate) fn finish(
    state: &ScanState,
    utf8_ok: bool,
    len: usize,
    out: &mut StructuralIndexes,
) -> Result<(), ScanError> {
    if state.unescaped_error != 0 {
        return Err(ScanError::UnescapedChars);
    }
    if state.prev_in_string != 0 {
        return Err(ScanError::UnclosedString);
    }
    if !utf8_ok {
        return Err(ScanError::Utf8Error);
    }
    if out.is_empty() {
        return Err(ScanError::Empty);
    }
    let last = out.as_slice()[out.len() - 1] as usize;
    if last > len {
        return Err(ScanError::Unexpected);
    }
    if last != len {
        out.push_sentinel(len as u32);
    }
    Ok(())
}

/// Scan `input`, recording every structural byte offset into `out`.
///
/// On success `out` holds the offsets in strictly increasing order followed
/// by a sentinel equal to `input.len()`. Picks the widest back-end the CPU
/// supports; behavior is identical across back-ends.
#[cfg(all(target_arch = "x86_64", any(test, feature = "std")))]
pub fn scan(input: &Padded, out: &mut StructuralIndexes) -> Result<(), ScanError> {
    if is_x86_feature_detected!("avx2")
        && is_x86_feature_detected!("pclmulqdq")
        && is_x86_feature_detected!("bmi1")
    {
        // SAFETY: required features verified above.
        return unsafe { avx2::scan(input, out) };
    }
    if is_x86_feature_detected!("sse4.2") && is_x86_feature_detected!("pclmulqdq") {
        // SAFETY: required features verified above.
        return unsafe { sse42::scan(input, out) };
    }
    scalar::scan(input, out)
}

/// Scan `input`, recording every structural byte offset into `out`.
///
/// On success `out` holds the offsets in strictly increasing order followed
/// by a sentinel equal to `input.len()`.
#[cfg(target_arch = "aarch64")]
pub fn scan(input: &Padded, out: &mut StructuralIndexes) -> Result<(), ScanError> {
    // NEON is mandatory on aarch64; no runtime detection required.
    neon::scan(input, out)
}

// On x86_64 without std there is no runtime feature detection, and on other
// architectures no SIMD back-end exists; the portable back-end is always
// safe to run.
#[cfg(not(any(
    target_arch = "aarch64",
    all(target_arch = "x86_64", any(test, feature = "std"))
)))]
pub use scalar::scan;
