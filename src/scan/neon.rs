//! NEON structural scanning back-end for aarch64.
//!
//! Processes 64-byte blocks as four 16-byte registers. NEON is mandatory on
//! aarch64, so this back-end needs no runtime detection. There is no
//! carry-less multiply here; the quote-parity prefix XOR uses the portable
//! six-step log fold, which is bit-for-bit equivalent to the PCLMUL path.

use core::arch::aarch64::*;

use crate::error::ScanError;
use crate::index::{StructuralIndexes, flatten_bits};
use crate::input::Padded;
use crate::scan::{self, Bitmaps, Fold, ScanState};
use crate::strings::{self, BsQuote, StringBuffer};

/// Bytes per unescape window (two NEON registers).
const SCAN_WIDTH: usize = 32;

/// Per-byte bit weights used to fold compare masks into bitmaps.
static BIT_MASK: [u8; 16] = [
    0x01, 0x02, 0x04, 0x08, 0x10, 0x20, 0x40, 0x80, //
    0x01, 0x02, 0x04, 0x08, 0x10, 0x20, 0x40, 0x80,
];

/// 64 input bytes as four NEON registers.
#[derive(Clone, Copy)]
struct SimdInput {
    v: [uint8x16_t; 4],
}

impl SimdInput {
    #[target_feature(enable = "neon")]
    unsafe fn new(ptr: *const u8) -> Self {
        unsafe {
            Self {
                v: [
                    vld1q_u8(ptr),
                    vld1q_u8(ptr.add(16)),
                    vld1q_u8(ptr.add(32)),
                    vld1q_u8(ptr.add(48)),
                ],
            }
        }
    }

    /// Fold four compare masks into a 64-bit bitmap, LSB first, using the
    /// pairwise-add reduction (NEON has no movemask).
    #[target_feature(enable = "neon")]
    unsafe fn bitmask(m0: uint8x16_t, m1: uint8x16_t, m2: uint8x16_t, m3: uint8x16_t) -> u64 {
        unsafe {
            let bit_mask = vld1q_u8(BIT_MASK.as_ptr());
            let sum0 = vpaddq_u8(vandq_u8(m0, bit_mask), vandq_u8(m1, bit_mask));
            let sum1 = vpaddq_u8(vandq_u8(m2, bit_mask), vandq_u8(m3, bit_mask));
            let sum = vpaddq_u8(sum0, sum1);
            let sum = vpaddq_u8(sum, sum);
            vgetq_lane_u64::<0>(vreinterpretq_u64_u8(sum))
        }
    }

    #[target_feature(enable = "neon")]
    unsafe fn eq(&self, m: u8) -> u64 {
        unsafe {
            let mask = vdupq_n_u8(m);
            Self::bitmask(
                vceqq_u8(self.v[0], mask),
                vceqq_u8(self.v[1], mask),
                vceqq_u8(self.v[2], mask),
                vceqq_u8(self.v[3], mask),
            )
        }
    }

    /// Unsigned byte-wise `<= m`.
    #[target_feature(enable = "neon")]
    unsafe fn lteq(&self, m: u8) -> u64 {
        unsafe {
            let mask = vdupq_n_u8(m);
            Self::bitmask(
                vcleq_u8(self.v[0], mask),
                vcleq_u8(self.v[1], mask),
                vcleq_u8(self.v[2], mask),
                vcleq_u8(self.v[3], mask),
            )
        }
    }

    /// Whitespace via a nibble table whose output equals the input byte
    /// exactly for space, tab, newline and carriage return.
    #[target_feature(enable = "neon")]
    unsafe fn whitespace(&self) -> u64 {
        unsafe {
            static WHITESPACE_TABLE: [u8; 16] = [
                32, 100, 100, 100, 17, 100, 113, 2, 100, 9, 10, 112, 100, 13, 100, 100,
            ];
            let table = vld1q_u8(WHITESPACE_TABLE.as_ptr());
            Self::bitmask(
                whitespace_reg(self.v[0], table),
                whitespace_reg(self.v[1], table),
                whitespace_reg(self.v[2], table),
                whitespace_reg(self.v[3], table),
            )
        }
    }

    /// The operator set `{ } [ ] , :` via the `OR 0x20` curly fold.
    #[target_feature(enable = "neon")]
    unsafe fn ops(&self) -> u64 {
        unsafe {
            Self::bitmask(
                op_reg(self.v[0]),
                op_reg(self.v[1]),
                op_reg(self.v[2]),
                op_reg(self.v[3]),
            )
        }
    }
}

#[target_feature(enable = "neon")]
unsafe fn whitespace_reg(v: uint8x16_t, table: uint8x16_t) -> uint8x16_t {
    unsafe {
        // vqtbl1q indexes the full byte, so mask down to the low nibble.
        let shuffled = vqtbl1q_u8(table, vandq_u8(v, vdupq_n_u8(0x0F)));
        vceqq_u8(v, shuffled)
    }
}

#[target_feature(enable = "neon")]
unsafe fn op_reg(v: uint8x16_t) -> uint8x16_t {
    unsafe {
        let curly = vorrq_u8(v, vdupq_n_u8(0x20));
        vorrq_u8(
            vorrq_u8(
                vceqq_u8(curly, vdupq_n_u8(b'{')),
                vceqq_u8(curly, vdupq_n_u8(b'}')),
            ),
            vorrq_u8(
                vceqq_u8(v, vdupq_n_u8(b':')),
                vceqq_u8(v, vdupq_n_u8(b',')),
            ),
        )
    }
}

#[target_feature(enable = "neon")]
unsafe fn classify(input: &SimdInput) -> Bitmaps {
    unsafe {
        Bitmaps {
            backslash: input.eq(b'\\'),
            quote: input.eq(b'"'),
            whitespace: input.whitespace(),
            op: input.ops(),
            ctrl: input.lteq(0x1F),
        }
    }
}

// ============================================================================
// UTF-8 validation
// ============================================================================

static NIBBLE_LENGTHS: [i8; 16] = [
    1, 1, 1, 1, 1, 1, 1, 1, // 0xxx (ASCII)
    0, 0, 0, 0, // 10xx (continuation)
    2, 2, // 110x
    3, // 1110
    4, // 1111, next should be 0 (rejected by the 0xF4 check)
];

static INITIAL_MINS: [i8; 16] = [
    -128, -128, -128, -128, -128, -128, -128, -128, // 0xxx
    -128, -128, -128, -128, // 10xx
    0xC2u8 as i8, -128, // 110x
    0xE1u8 as i8, // 1110
    0xF1u8 as i8, // 1111
];

static SECOND_MINS: [i8; 16] = [
    -128, -128, -128, -128, -128, -128, -128, -128, // 0xxx
    -128, -128, -128, -128, // 10xx
    127, 127, // 110x, always passes
    0xA0u8 as i8, // 1110
    0x90u8 as i8, // 1111
];

static LAST_1: [i8; 16] = [9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 1];

#[derive(Clone, Copy)]
struct ProcessedBytes {
    raw: uint8x16_t,
    high_nibbles: int8x16_t,
    carried_continuations: int8x16_t,
}

/// Incremental UTF-8 checker over the scanner's block loads; the NEON twin
/// of the x86 checkers.
struct Utf8Checker {
    has_error: uint8x16_t,
    previous: ProcessedBytes,
}

#[target_feature(enable = "neon")]
unsafe fn high_nibbles(v: uint8x16_t) -> int8x16_t {
    unsafe { vreinterpretq_s8_u8(vshrq_n_u8::<4>(v)) }
}

impl Utf8Checker {
    #[target_feature(enable = "neon")]
    unsafe fn new() -> Self {
        unsafe {
            Self {
                has_error: vdupq_n_u8(0),
                previous: ProcessedBytes {
                    raw: vdupq_n_u8(0),
                    high_nibbles: vdupq_n_s8(0),
                    carried_continuations: vdupq_n_s8(0),
                },
            }
        }
    }

    #[target_feature(enable = "neon")]
    unsafe fn check_smaller_than_0xf4(&mut self, current: uint8x16_t) {
        unsafe {
            // Unsigned saturating subtraction: zero for anything <= 0xF4.
            self.has_error = vorrq_u8(self.has_error, vqsubq_u8(current, vdupq_n_u8(0xF4)));
        }
    }

    #[target_feature(enable = "neon")]
    unsafe fn continuation_lengths(nibbles: int8x16_t) -> int8x16_t {
        unsafe {
            vqtbl1q_s8(
                vld1q_s8(NIBBLE_LENGTHS.as_ptr()),
                vreinterpretq_u8_s8(nibbles),
            )
        }
    }

    #[target_feature(enable = "neon")]
    unsafe fn carry_continuations(&self, initial_lengths: int8x16_t) -> int8x16_t {
        unsafe {
            let right1 = vreinterpretq_s8_u8(vqsubq_u8(
                vreinterpretq_u8_s8(vextq_s8::<15>(
                    self.previous.carried_continuations,
                    initial_lengths,
                )),
                vdupq_n_u8(1),
            ));
            let sum = vaddq_s8(initial_lengths, right1);
            let right2 = vreinterpretq_s8_u8(vqsubq_u8(
                vreinterpretq_u8_s8(vextq_s8::<14>(self.previous.carried_continuations, sum)),
                vdupq_n_u8(2),
            ));
            vaddq_s8(sum, right2)
        }
    }

    #[target_feature(enable = "neon")]
    unsafe fn check_continuations(&mut self, initial_lengths: int8x16_t, carries: int8x16_t) {
        unsafe {
            // (carries > length) == (length > 0) detects both an overlap
            // and an underlap.
            let overunder = vceqq_u8(
                vcgtq_s8(carries, initial_lengths),
                vcgtq_s8(initial_lengths, vdupq_n_s8(0)),
            );
            self.has_error = vorrq_u8(self.has_error, overunder);
        }
    }

    /// When 0xED is found the next byte must be at most 0x9F; when 0xF4 is
    /// found the next byte must be at most 0x8F. The next byte is a
    /// continuation (sign bit set), so signed compares suffice.
    #[target_feature(enable = "neon")]
    unsafe fn check_first_continuation_max(&mut self, current: uint8x16_t, off1: uint8x16_t) {
        unsafe {
            let prev_ed = vceqq_u8(off1, vdupq_n_u8(0xED));
            let prev_f4 = vceqq_u8(off1, vdupq_n_u8(0xF4));
            let current_s = vreinterpretq_s8_u8(current);
            let ed_too_large = vandq_u8(vcgtq_s8(current_s, vdupq_n_s8(0x9Fu8 as i8)), prev_ed);
            let f4_too_large = vandq_u8(vcgtq_s8(current_s, vdupq_n_s8(0x8Fu8 as i8)), prev_f4);
            self.has_error = vorrq_u8(self.has_error, vorrq_u8(ed_too_large, f4_too_large));
        }
    }

    #[target_feature(enable = "neon")]
    unsafe fn check_overlong(&mut self, current: uint8x16_t, off1: uint8x16_t, nibbles: int8x16_t) {
        unsafe {
            let off1_nibbles = vextq_s8::<15>(self.previous.high_nibbles, nibbles);
            let initial_mins = vqtbl1q_s8(
                vld1q_s8(INITIAL_MINS.as_ptr()),
                vreinterpretq_u8_s8(off1_nibbles),
            );
            let initial_under = vcgtq_s8(initial_mins, vreinterpretq_s8_u8(off1));
            let second_mins = vqtbl1q_s8(
                vld1q_s8(SECOND_MINS.as_ptr()),
                vreinterpretq_u8_s8(off1_nibbles),
            );
            let second_under = vcgtq_s8(second_mins, vreinterpretq_s8_u8(current));
            self.has_error = vorrq_u8(self.has_error, vandq_u8(initial_under, second_under));
        }
    }

    #[target_feature(enable = "neon")]
    unsafe fn check_carried_continuations(&mut self) {
        unsafe {
            let verror = vld1q_s8(LAST_1.as_ptr());
            self.has_error = vorrq_u8(
                self.has_error,
                vcgtq_s8(self.previous.carried_continuations, verror),
            );
        }
    }

    #[target_feature(enable = "neon")]
    unsafe fn check_utf8_bytes(&mut self, current: uint8x16_t) {
        unsafe {
            self.check_smaller_than_0xf4(current);
            let nibbles = high_nibbles(current);
            let initial_lengths = Self::continuation_lengths(nibbles);
            let carried = self.carry_continuations(initial_lengths);
            self.check_continuations(initial_lengths, carried);

            let off1 = vreinterpretq_u8_s8(vextq_s8::<15>(
                vreinterpretq_s8_u8(self.previous.raw),
                vreinterpretq_s8_u8(current),
            ));
            self.check_first_continuation_max(current, off1);
            self.check_overlong(current, off1, nibbles);

            self.previous = ProcessedBytes {
                raw: current,
                high_nibbles: nibbles,
                carried_continuations: carried,
            };
        }
    }

    /// Check one 64-byte block. Pure-ASCII blocks only verify the carried
    /// continuation count and then stand in as the new history.
    #[target_feature(enable = "neon")]
    unsafe fn check_block(&mut self, input: &SimdInput) {
        unsafe {
            let reduced = vorrq_u8(
                vorrq_u8(input.v[0], input.v[1]),
                vorrq_u8(input.v[2], input.v[3]),
            );
            if vmaxvq_u8(reduced) >= 0x80 {
                for v in input.v {
                    self.check_utf8_bytes(v);
                }
            } else {
                self.check_carried_continuations();
                let last = input.v[3];
                self.previous = ProcessedBytes {
                    raw: last,
                    high_nibbles: high_nibbles(last),
                    carried_continuations: vdupq_n_s8(0),
                };
            }
        }
    }

    #[target_feature(enable = "neon")]
    unsafe fn finish(&mut self) -> bool {
        unsafe {
            self.check_carried_continuations();
            vmaxvq_u8(self.has_error) == 0
        }
    }
}

// ============================================================================
// Entry points
// ============================================================================

/// Scan `input` with the NEON back-end.
pub fn scan(input: &Padded, out: &mut StructuralIndexes) -> Result<(), ScanError> {
    // SAFETY: NEON is mandatory on aarch64.
    unsafe { scan_neon(input, out) }
}

#[target_feature(enable = "neon")]
unsafe fn scan_neon(input: &Padded, out: &mut StructuralIndexes) -> Result<(), ScanError> {
    unsafe {
        scan::check_capacity(input.len(), out)?;
        out.clear();

        let bytes = input.bytes();
        let len = bytes.len();
        let mut state = ScanState::new();
        let mut utf8 = Utf8Checker::new();

        let mut idx = 0usize;
        while idx + 64 <= len {
            let block = SimdInput::new(bytes.as_ptr().add(idx));
            utf8.check_block(&block);
            scan::scan_block::<Fold>(classify(&block), idx, &mut state, out);
            idx += 64;
        }
        if idx < len {
            let mut scratch = [0x20u8; 64];
            scratch[..len - idx].copy_from_slice(&bytes[idx..]);
            let block = SimdInput::new(scratch.as_ptr());
            utf8.check_block(&block);
            scan::scan_block::<Fold>(classify(&block), idx, &mut state, out);
            idx += 64;
        }
        flatten_bits(out, idx as u32, state.structurals);

        scan::finish(&state, utf8.finish(), len, out)
    }
}

/// Copy a 32-byte window to `dst` and report backslash/quote bitmaps, both
/// packed through one pairwise-add reduction.
#[target_feature(enable = "neon")]
unsafe fn find_bs_quote(src: *const u8, dst: *mut u8) -> BsQuote {
    unsafe {
        let v0 = vld1q_u8(src);
        let v1 = vld1q_u8(src.add(16));
        // Store unconditionally; bytes we dislike are overwritten or fall
        // past the committed length.
        vst1q_u8(dst, v0);
        vst1q_u8(dst.add(16), v1);

        let bs_mask = vdupq_n_u8(b'\\');
        let qt_mask = vdupq_n_u8(b'"');
        let bit_mask = vld1q_u8(BIT_MASK.as_ptr());
        let cmp_bs_0 = vandq_u8(vceqq_u8(v0, bs_mask), bit_mask);
        let cmp_bs_1 = vandq_u8(vceqq_u8(v1, bs_mask), bit_mask);
        let cmp_qt_0 = vandq_u8(vceqq_u8(v0, qt_mask), bit_mask);
        let cmp_qt_1 = vandq_u8(vceqq_u8(v1, qt_mask), bit_mask);

        let sum0 = vpaddq_u8(cmp_bs_0, cmp_bs_1);
        let sum1 = vpaddq_u8(cmp_qt_0, cmp_qt_1);
        let sum0 = vpaddq_u8(sum0, sum1);
        let sum0 = vpaddq_u8(sum0, sum0);
        let lanes = vreinterpretq_u32_u8(sum0);
        BsQuote {
            bs: vgetq_lane_u32::<0>(lanes) as u64,
            quote: vgetq_lane_u32::<1>(lanes) as u64,
        }
    }
}

/// Decode the string whose opening quote is at `src_pos` with the NEON
/// back-end. See [`unescape`](crate::strings::unescape).
pub fn unescape(input: &Padded, src_pos: usize, out: &mut StringBuffer) -> bool {
    // SAFETY: NEON is mandatory on aarch64; the 32-byte windows stay inside
    // the padded region.
    unsafe {
        strings::drive_unescape::<SCAN_WIDTH>(input, src_pos, out, |src, dst| unsafe {
            find_bs_quote(src, dst)
        })
    }
}

#[cfg(all(test, target_arch = "aarch64"))]
mod tests {
    use super::*;
    use crate::scan::scalar;

    fn scan_both(input: &[u8]) -> (Result<Vec<u32>, ScanError>, Result<Vec<u32>, ScanError>) {
        let padded = Padded::from(input);
        let mut simd_out = StructuralIndexes::with_capacity_for(padded.len());
        let mut scalar_out = StructuralIndexes::with_capacity_for(padded.len());
        let simd = scan(&padded, &mut simd_out).map(|()| simd_out.as_slice().to_vec());
        let scalar =
            scalar::scan(&padded, &mut scalar_out).map(|()| scalar_out.as_slice().to_vec());
        (simd, scalar)
    }

    #[test]
    fn test_neon_matches_scalar_basic() {
        let cases: &[&[u8]] = &[
            b"{}",
            br#"{"a":"b"}"#,
            br#"{"name":"value","number":12345,"array":[1,2,3]}"#,
            b"  [1, 2 , \"x\"]",
            br#"{"escaped":"a\"b\\c"}"#,
        ];
        for &json in cases {
            let (simd, scalar) = scan_both(json);
            assert_eq!(simd, scalar, "mismatch for {:?}", String::from_utf8_lossy(json));
        }
    }

    #[test]
    fn test_neon_matches_scalar_block_boundaries() {
        for pad in 56..72 {
            let mut json = Vec::new();
            json.push(b'[');
            json.push(b'"');
            json.resize(pad, b'x');
            json.extend_from_slice(br#"\"\\","k"]"#);
            let (simd, scalar) = scan_both(&json);
            assert_eq!(simd, scalar, "mismatch at pad {pad}");
        }
    }

    #[test]
    fn test_neon_matches_scalar_errors() {
        let cases: &[&[u8]] = &[
            b"",
            b"   ",
            b"\"ab",
            b"\"\x01\"",
            b"\xC0\x80",
            b"\xED\xA0\x80",
            b"\"caf\xC3\xA9\"",
            b"\xF0\x9F\x98\x80",
        ];
        for &json in cases {
            let (simd, scalar) = scan_both(json);
            assert_eq!(simd, scalar, "mismatch for {json:?}");
        }
    }

    #[test]
    fn test_neon_unescape() {
        let padded = Padded::from(r#""😀 and \n""#);
        let mut buf = StringBuffer::new();
        assert!(unescape(&padded, 0, &mut buf));
        assert_eq!(buf.get(0), Some("😀 and \n".as_bytes()));
    }
}
