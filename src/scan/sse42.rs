//! SSE4.2 structural scanning back-end for x86_64.
//!
//! Processes 64-byte blocks as four 16-byte registers. SSE4.2 is available
//! on Intel Nehalem (2008+) and AMD Bulldozer (2011+); the quote-parity
//! prefix XOR additionally needs PCLMULQDQ, which shipped alongside it on
//! everything relevant.

use core::arch::x86_64::*;

use crate::error::ScanError;
use crate::index::{StructuralIndexes, flatten_bits};
use crate::input::Padded;
use crate::scan::{self, Bitmaps, Clmul, ScanState};
use crate::strings::{self, BsQuote, StringBuffer};

/// Bytes per unescape window.
const SCAN_WIDTH: usize = 16;

/// 64 input bytes as four SSE registers.
#[derive(Clone, Copy)]
struct SimdInput {
    v: [__m128i; 4],
}

impl SimdInput {
    #[target_feature(enable = "sse4.2")]
    unsafe fn new(ptr: *const u8) -> Self {
        unsafe {
            Self {
                v: [
                    _mm_loadu_si128(ptr as *const __m128i),
                    _mm_loadu_si128(ptr.add(16) as *const __m128i),
                    _mm_loadu_si128(ptr.add(32) as *const __m128i),
                    _mm_loadu_si128(ptr.add(48) as *const __m128i),
                ],
            }
        }
    }

    /// Combine four register masks into a 64-bit bitmap, LSB first.
    #[target_feature(enable = "sse4.2")]
    unsafe fn bitmask(m0: __m128i, m1: __m128i, m2: __m128i, m3: __m128i) -> u64 {
        unsafe {
            let b0 = _mm_movemask_epi8(m0) as u16 as u64;
            let b1 = _mm_movemask_epi8(m1) as u16 as u64;
            let b2 = _mm_movemask_epi8(m2) as u16 as u64;
            let b3 = _mm_movemask_epi8(m3) as u16 as u64;
            b0 | b1 << 16 | b2 << 32 | b3 << 48
        }
    }

    #[target_feature(enable = "sse4.2")]
    unsafe fn eq(&self, m: u8) -> u64 {
        unsafe {
            let mask = _mm_set1_epi8(m as i8);
            Self::bitmask(
                _mm_cmpeq_epi8(self.v[0], mask),
                _mm_cmpeq_epi8(self.v[1], mask),
                _mm_cmpeq_epi8(self.v[2], mask),
                _mm_cmpeq_epi8(self.v[3], mask),
            )
        }
    }

    /// Unsigned byte-wise `<= m`.
    #[target_feature(enable = "sse4.2")]
    unsafe fn lteq(&self, m: u8) -> u64 {
        unsafe {
            let mask = _mm_set1_epi8(m as i8);
            Self::bitmask(
                le_reg(self.v[0], mask),
                le_reg(self.v[1], mask),
                le_reg(self.v[2], mask),
                le_reg(self.v[3], mask),
            )
        }
    }

    /// Whitespace via a nibble shuffle whose output equals the input byte
    /// exactly for space, tab, newline and carriage return.
    #[target_feature(enable = "sse4.2")]
    unsafe fn whitespace(&self) -> u64 {
        unsafe {
            let table = _mm_setr_epi8(
                32, 100, 100, 100, 17, 100, 113, 2, 100, 9, 10, 112, 100, 13, 100, 100,
            );
            Self::bitmask(
                whitespace_reg(self.v[0], table),
                whitespace_reg(self.v[1], table),
                whitespace_reg(self.v[2], table),
                whitespace_reg(self.v[3], table),
            )
        }
    }

    /// The operator set `{ } [ ] , :`. `[` and `]` fold onto `{` and `}`
    /// under `OR 0x20`, so all four braces cost two compares.
    #[target_feature(enable = "sse4.2")]
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

#[target_feature(enable = "sse4.2")]
unsafe fn le_reg(v: __m128i, mask: __m128i) -> __m128i {
    unsafe { _mm_cmpeq_epi8(_mm_min_epu8(v, mask), v) }
}

#[target_feature(enable = "sse4.2")]
unsafe fn whitespace_reg(v: __m128i, table: __m128i) -> __m128i {
    unsafe { _mm_cmpeq_epi8(v, _mm_shuffle_epi8(table, v)) }
}

#[target_feature(enable = "sse4.2")]
unsafe fn op_reg(v: __m128i) -> __m128i {
    unsafe {
        let curly = _mm_or_si128(v, _mm_set1_epi8(0x20));
        _mm_or_si128(
            _mm_or_si128(
                _mm_cmpeq_epi8(curly, _mm_set1_epi8(b'{' as i8)),
                _mm_cmpeq_epi8(curly, _mm_set1_epi8(b'}' as i8)),
            ),
            _mm_or_si128(
                _mm_cmpeq_epi8(v, _mm_set1_epi8(b':' as i8)),
                _mm_cmpeq_epi8(v, _mm_set1_epi8(b',' as i8)),
            ),
        )
    }
}

#[target_feature(enable = "sse4.2")]
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

/// Register-level state the checker carries from one block to the next.
#[derive(Clone, Copy)]
struct ProcessedBytes {
    raw: __m128i,
    high_nibbles: __m128i,
    carried_continuations: __m128i,
}

/// Incremental UTF-8 checker over the scanner's block loads.
///
/// Accumulates error bytes into `has_error`; any nonzero lane at the end of
/// input means the document is not valid UTF-8 (Unicode 6.0, table 3-7).
struct Utf8Checker {
    has_error: __m128i,
    previous: ProcessedBytes,
}

/// `result[i] = prev[15]` for lane 0, `cur[i - 1]` after.
#[target_feature(enable = "sse4.2")]
unsafe fn prev1(cur: __m128i, prev: __m128i) -> __m128i {
    unsafe { _mm_alignr_epi8::<15>(cur, prev) }
}

#[target_feature(enable = "sse4.2")]
unsafe fn prev2(cur: __m128i, prev: __m128i) -> __m128i {
    unsafe { _mm_alignr_epi8::<14>(cur, prev) }
}

#[target_feature(enable = "sse4.2")]
unsafe fn high_nibbles(v: __m128i) -> __m128i {
    unsafe { _mm_and_si128(_mm_srli_epi16::<4>(v), _mm_set1_epi8(0x0F)) }
}

impl Utf8Checker {
    #[target_feature(enable = "sse4.2")]
    unsafe fn new() -> Self {
        unsafe {
            let zero = _mm_setzero_si128();
            Self {
                has_error: zero,
                previous: ProcessedBytes {
                    raw: zero,
                    high_nibbles: zero,
                    carried_continuations: zero,
                },
            }
        }
    }

    /// All byte values must be no larger than 0xF4; unsigned saturating
    /// subtraction leaves zero for anything smaller.
    #[target_feature(enable = "sse4.2")]
    unsafe fn check_smaller_than_0xf4(&mut self, current: __m128i) {
        unsafe {
            self.has_error = _mm_or_si128(
                self.has_error,
                _mm_subs_epu8(current, _mm_set1_epi8(0xF4u8 as i8)),
            );
        }
    }

    /// Required continuation count per byte: 1 for ASCII, 0 for
    /// continuations, 2/3/4 for lead bytes (the 4 also covers the invalid
    /// 11111xxx range, rejected by the 0xF4 check).
    #[target_feature(enable = "sse4.2")]
    unsafe fn continuation_lengths(nibbles: __m128i) -> __m128i {
        unsafe {
            let table = _mm_setr_epi8(1, 1, 1, 1, 1, 1, 1, 1, 0, 0, 0, 0, 2, 2, 3, 4);
            _mm_shuffle_epi8(table, nibbles)
        }
    }

    /// Running countdown of expected continuations, carried across blocks.
    #[target_feature(enable = "sse4.2")]
    unsafe fn carry_continuations(&self, initial_lengths: __m128i) -> __m128i {
        unsafe {
            let right1 = _mm_subs_epu8(
                prev1(initial_lengths, self.previous.carried_continuations),
                _mm_set1_epi8(1),
            );
            let sum = _mm_add_epi8(initial_lengths, right1);
            let right2 = _mm_subs_epu8(
                prev2(sum, self.previous.carried_continuations),
                _mm_set1_epi8(2),
            );
            _mm_add_epi8(sum, right2)
        }
    }

    /// `(carries > length) == (length > 0)` must hold everywhere; a
    /// mismatch is a missing or unexpected continuation byte.
    #[target_feature(enable = "sse4.2")]
    unsafe fn check_continuations(&mut self, initial_lengths: __m128i, carries: __m128i) {
        unsafe {
            let overunder = _mm_cmpeq_epi8(
                _mm_cmpgt_epi8(carries, initial_lengths),
                _mm_cmpgt_epi8(initial_lengths, _mm_setzero_si128()),
            );
            self.has_error = _mm_or_si128(self.has_error, overunder);
        }
    }

    /// When 0xED is found the next byte must be at most 0x9F; when 0xF4 is
    /// found the next byte must be at most 0x8F. The next byte is a
    /// continuation (sign bit set), so signed compares suffice; a following
    /// ASCII byte also trips this, but that is an error anyway.
    #[target_feature(enable = "sse4.2")]
    unsafe fn check_first_continuation_max(&mut self, current: __m128i, off1: __m128i) {
        unsafe {
            let prev_ed = _mm_cmpeq_epi8(off1, _mm_set1_epi8(0xEDu8 as i8));
            let prev_f4 = _mm_cmpeq_epi8(off1, _mm_set1_epi8(0xF4u8 as i8));
            let ed_too_large =
                _mm_and_si128(_mm_cmpgt_epi8(current, _mm_set1_epi8(0x9Fu8 as i8)), prev_ed);
            let f4_too_large =
                _mm_and_si128(_mm_cmpgt_epi8(current, _mm_set1_epi8(0x8Fu8 as i8)), prev_f4);
            self.has_error = _mm_or_si128(self.has_error, _mm_or_si128(ed_too_large, f4_too_large));
        }
    }

    /// Overlong detection: two-byte leads must be at least 0xC2, 0xE0 must
    /// be followed by at least 0xA0, 0xF0 by at least 0x90. Two nibble
    /// lookups on the previous byte produce the minimum lead byte and the
    /// minimum second byte; both under their minimum marks an error.
    #[target_feature(enable = "sse4.2")]
    unsafe fn check_overlong(&mut self, current: __m128i, off1: __m128i, nibbles: __m128i) {
        unsafe {
            let off1_nibbles = prev1(nibbles, self.previous.high_nibbles);
            let initial_mins_table = _mm_setr_epi8(
                -128, -128, -128, -128, -128, -128, -128, -128, // 0xxx
                -128, -128, -128, -128, // 10xx
                0xC2u8 as i8, -128, // 110x
                0xE1u8 as i8, // 1110
                0xF1u8 as i8, // 1111
            );
            let initial_mins = _mm_shuffle_epi8(initial_mins_table, off1_nibbles);
            let initial_under = _mm_cmpgt_epi8(initial_mins, off1);

            let second_mins_table = _mm_setr_epi8(
                -128, -128, -128, -128, -128, -128, -128, -128, // 0xxx
                -128, -128, -128, -128, // 10xx
                127, 127, // 110x, always passes
                0xA0u8 as i8, // 1110
                0x90u8 as i8, // 1111
            );
            let second_mins = _mm_shuffle_epi8(second_mins_table, off1_nibbles);
            let second_under = _mm_cmpgt_epi8(second_mins, current);
            self.has_error = _mm_or_si128(self.has_error, _mm_and_si128(initial_under, second_under));
        }
    }

    /// The previous block must not have ended expecting more continuation
    /// bytes: only the final lane's countdown may exceed one by nothing.
    #[target_feature(enable = "sse4.2")]
    unsafe fn check_carried_continuations(&mut self) {
        unsafe {
            let last_1 = _mm_setr_epi8(9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 1);
            self.has_error = _mm_or_si128(
                self.has_error,
                _mm_cmpgt_epi8(self.previous.carried_continuations, last_1),
            );
        }
    }

    #[target_feature(enable = "sse4.2")]
    unsafe fn check_utf8_bytes(&mut self, current: __m128i) {
        unsafe {
            self.check_smaller_than_0xf4(current);
            let nibbles = high_nibbles(current);
            let initial_lengths = Self::continuation_lengths(nibbles);
            let carried = self.carry_continuations(initial_lengths);
            self.check_continuations(initial_lengths, carried);

            let off1 = prev1(current, self.previous.raw);
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
    #[target_feature(enable = "sse4.2")]
    unsafe fn check_block(&mut self, input: &SimdInput) {
        unsafe {
            let reduced = _mm_or_si128(
                _mm_or_si128(input.v[0], input.v[1]),
                _mm_or_si128(input.v[2], input.v[3]),
            );
            if _mm_movemask_epi8(reduced) != 0 {
                for v in input.v {
                    self.check_utf8_bytes(v);
                }
            } else {
                self.check_carried_continuations();
                let last = input.v[3];
                self.previous = ProcessedBytes {
                    raw: last,
                    high_nibbles: high_nibbles(last),
                    carried_continuations: _mm_setzero_si128(),
                };
            }
        }
    }

    /// Final verdict: the last byte must not still expect continuations.
    #[target_feature(enable = "sse4.2")]
    unsafe fn finish(&mut self) -> bool {
        unsafe {
            self.check_carried_continuations();
            _mm_testz_si128(self.has_error, self.has_error) == 1
        }
    }
}

// ============================================================================
// Entry points
// ============================================================================

/// Scan `input` with the SSE4.2 back-end.
///
/// # Safety
///
/// The CPU must support SSE4.2 and PCLMULQDQ.
#[target_feature(enable = "sse4.2,pclmulqdq")]
pub unsafe fn scan(input: &Padded, out: &mut StructuralIndexes) -> Result<(), ScanError> {
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
            scan::scan_block::<Clmul>(classify(&block), idx, &mut state, out);
            idx += 64;
        }
        if idx < len {
            let mut scratch = [0x20u8; 64];
            scratch[..len - idx].copy_from_slice(&bytes[idx..]);
            let block = SimdInput::new(scratch.as_ptr());
            utf8.check_block(&block);
            scan::scan_block::<Clmul>(classify(&block), idx, &mut state, out);
            idx += 64;
        }
        flatten_bits(out, idx as u32, state.structurals);

        scan::finish(&state, utf8.finish(), len, out)
    }
}

/// Copy a 16-byte window to `dst` and report backslash/quote bitmaps.
#[target_feature(enable = "sse4.2")]
unsafe fn find_bs_quote(src: *const u8, dst: *mut u8) -> BsQuote {
    unsafe {
        let v = _mm_loadu_si128(src as *const __m128i);
        // Store unconditionally; bytes we dislike are overwritten or fall
        // past the committed length.
        _mm_storeu_si128(dst as *mut __m128i, v);
        BsQuote {
            bs: _mm_movemask_epi8(_mm_cmpeq_epi8(v, _mm_set1_epi8(b'\\' as i8))) as u16 as u64,
            quote: _mm_movemask_epi8(_mm_cmpeq_epi8(v, _mm_set1_epi8(b'"' as i8))) as u16 as u64,
        }
    }
}

/// Decode the string whose opening quote is at `src_pos` with the SSE4.2
/// back-end. See [`unescape`](crate::strings::unescape).
///
/// # Safety
///
/// The CPU must support SSE4.2.
#[target_feature(enable = "sse4.2")]
pub unsafe fn unescape(input: &Padded, src_pos: usize, out: &mut StringBuffer) -> bool {
    unsafe {
        strings::drive_unescape::<SCAN_WIDTH>(input, src_pos, out, |src, dst| unsafe {
            find_bs_quote(src, dst)
        })
    }
}
