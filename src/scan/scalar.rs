//! Portable scalar back-end.
//!
//! Classifies one byte at a time into the same per-block bitmaps the SIMD
//! back-ends produce, then runs the shared block algorithm. It exists as
//! the universal fallback and as the reference the SIMD back-ends are
//! tested against; it is the only back-end with no unsafe block loads, so
//! its UTF-8 verdict comes from a single `core::str::from_utf8` pass.

use crate::error::ScanError;
use crate::index::{StructuralIndexes, flatten_bits};
use crate::input::Padded;
use crate::scan::{self, Bitmaps, Fold, ScanState};
use crate::strings::{self, BsQuote, StringBuffer};

/// Build the classification bitmaps for one 64-byte block.
fn classify(block: &[u8]) -> Bitmaps {
    debug_assert_eq!(block.len(), 64);
    let mut backslash = 0u64;
    let mut quote = 0u64;
    let mut whitespace = 0u64;
    let mut op = 0u64;
    let mut ctrl = 0u64;
    for (i, &b) in block.iter().enumerate() {
        let bit = 1u64 << i;
        match b {
            b'\\' => backslash |= bit,
            b'"' => quote |= bit,
            b' ' | b'\t' | b'\n' | b'\r' => whitespace |= bit,
            b'{' | b'}' | b'[' | b']' | b':' | b',' => op |= bit,
            _ => {}
        }
        if b <= 0x1F {
            ctrl |= bit;
        }
    }
    Bitmaps {
        backslash,
        quote,
        whitespace,
        op,
        ctrl,
    }
}

/// Scan `input` with the portable back-end.
pub fn scan(input: &Padded, out: &mut StructuralIndexes) -> Result<(), ScanError> {
    scan::check_capacity(input.len(), out)?;
    out.clear();

    let bytes = input.bytes();
    let len = bytes.len();
    let utf8_ok = core::str::from_utf8(bytes).is_ok();

    let mut state = ScanState::new();
    let mut idx = 0usize;
    while idx + 64 <= len {
        scan::scan_block::<Fold>(classify(&bytes[idx..idx + 64]), idx, &mut state, out);
        idx += 64;
    }
    if idx < len {
        // Pad the final partial block with spaces so it classifies as pure
        // whitespace past the end of input.
        let mut scratch = [0x20u8; 64];
        scratch[..len - idx].copy_from_slice(&bytes[idx..]);
        scan::scan_block::<Fold>(classify(&scratch), idx, &mut state, out);
        idx += 64;
    }
    flatten_bits(out, idx as u32, state.structurals);

    scan::finish(&state, utf8_ok, len, out)
}

/// Bytewise quote/backslash location over a 16-byte window.
///
/// # Safety
///
/// `src` must have 16 addressable bytes and `dst` room for 16 bytes.
unsafe fn find_bs_quote(src: *const u8, dst: *mut u8) -> BsQuote {
    unsafe {
        core::ptr::copy_nonoverlapping(src, dst, 16);
        let mut bs = 0u64;
        let mut quote = 0u64;
        for i in 0..16 {
            match *src.add(i) {
                b'\\' => bs |= 1 << i,
                b'"' => quote |= 1 << i,
                _ => {}
            }
        }
        BsQuote { bs, quote }
    }
}

/// Decode the string whose opening quote is at `src_pos` with the portable
/// back-end. See [`unescape`](crate::strings::unescape).
pub fn unescape(input: &Padded, src_pos: usize, out: &mut StringBuffer) -> bool {
    // SAFETY: the 16-byte windows stay inside the padded region.
    unsafe {
        strings::drive_unescape::<16>(input, src_pos, out, |src, dst| unsafe {
            find_bs_quote(src, dst)
        })
    }
}
