//! AVX2 structural scanning back-end for x86_64.
//!
//! Processes 64-byte blocks as two 32-byte registers. AVX2 is available on
//! Intel Haswell (2013+) and AMD Excavator (2015+); the entry points also
//! rely on PCLMULQDQ for the quote-parity prefix XOR and BMI1 for the
//! flattener's bit clearing.

use core::arch::x86_64::*;

use crate::error::ScanError;
use crate::index::{StructuralIndexes, flatten_bits};
use crate::input::Padded;
use crate::scan::{self, Bitmaps, Clmul, ScanState};
use crate::strings::{self, BsQuote, StringBuffer};

/// Bytes per unescape window.
const SCAN_WIDTH: usize = 32;

/// 64 input bytes as two AVX registers.
#[derive(Clone, Copy)]
struct SimdInput {
    v: [__m256i; 2],
}

impl SimdInput {
    #[target_feature(enable = "avx2")]
    unsafe fn new(ptr: *const u8) -> Self {
        unsafe {
            Self {
                v: [
                    _mm256_loadu_si256(ptr as *const __m256i),
                    _mm256_loadu_si256(ptr.add(32) as *const __m256i),
                ],
            }
        }
    }

    /// Combine two register masks into a 64-bit bitmap, LSB first.
    #[target_feature(enable = "avx2")]
    unsafe fn bitmask(m0: __m256i, m1: __m256i) -> u64 {
        unsafe {
            let b0 = _mm256_movemask_epi8(m0) as u32 as u64;
            let b1 = _mm256_movemask_epi8(m1) as u32 as u64;
            b0 | b1 << 32
        }
    }

    #[target_feature(enable = "avx2")]
    unsafe fn eq(&self, m: u8) -> u64 {
        unsafe {
            let mask = _mm256_set1_epi8(m as i8);
            Self::bitmask(
                _mm256_cmpeq_epi8(self.v[0], mask),
                _mm256_cmpeq_epi8(self.v[1], mask),
            )
        }
    }

    /// Unsigned byte-wise `<= m`.
    #[target_feature(enable = "avx2")]
    unsafe fn lteq(&self, m: u8) -> u64 {
        unsafe {
            let mask = _mm256_set1_epi8(m as i8);
            Self::bitmask(le_reg(self.v[0], mask), le_reg(self.v[1], mask))
        }
    }

    /// Whitespace via a nibble shuffle whose output equals the input byte
    /// exactly for space, tab, newline and carriage return.
    #[target_feature(enable = "avx2")]
    unsafe fn whitespace(&self) -> u64 {
        unsafe {
            let table = _mm256_setr_epi8(
                32, 100, 100, 100, 17, 100, 113, 2, 100, 9, 10, 112, 100, 13, 100, 100, //
                32, 100, 100, 100, 17, 100, 113, 2, 100, 9, 10, 112, 100, 13, 100, 100,
            );
            Self::bitmask(
                whitespace_reg(self.v[0], table),
                whitespace_reg(self.v[1], table),
            )
        }
    }

    /// The operator set `{ } [ ] , :` via the `OR 0x20` curly fold.
    #[target_feature(enable = "avx2")]
    unsafe fn ops(&self) -> u64 {
        unsafe { Self::bitmask(op_reg(self.v[0]), op_reg(self.v[1])) }
    }
}

#[target_feature(enable = "avx2")]
unsafe fn le_reg(v: __m256i, mask: __m256i) -> __m256i {
    unsafe { _mm256_cmpeq_epi8(_mm256_min_epu8(v, mask), v) }
}

#[target_feature(enable = "avx2")]
unsafe fn whitespace_reg(v: __m256i, table: __m256i) -> __m256i {
    unsafe { _mm256_cmpeq_epi8(v, _mm256_shuffle_epi8(table, v)) }
}

#[target_feature(enable = "avx2")]
unsafe fn op_reg(v: __m256i) -> __m256i {
    unsafe {
        let curly = _mm256_or_si256(v, _mm256_set1_epi8(0x20));
        _mm256_or_si256(
            _mm256_or_si256(
                _mm256_cmpeq_epi8(curly, _mm256_set1_epi8(b'{' as i8)),
                _mm256_cmpeq_epi8(curly, _mm256_set1_epi8(b'}' as i8)),
            ),
            _mm256_or_si256(
                _mm256_cmpeq_epi8(v, _mm256_set1_epi8(b':' as i8)),
                _mm256_cmpeq_epi8(v, _mm256_set1_epi8(b',' as i8)),
            ),
        )
    }
}

#[target_feature(enable = "avx2")]
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

#[derive(Clone, Copy)]
struct ProcessedBytes {
    raw: __m256i,
    high_nibbles: __m256i,
    carried_continuations: __m256i,
}

/// Incremental UTF-8 checker over the scanner's block loads; the 256-bit
/// twin of the SSE4.2 checker.
struct Utf8Checker {
    has_error: __m256i,
    previous: ProcessedBytes,
}

/// Shift the concatenation of `prev` and `cur` right so each lane sees its
/// predecessor; the permute stitches the 128-bit halves together first.
#[target_feature(enable = "avx2")]
unsafe fn prev1(cur: __m256i, prev: __m256i) -> __m256i {
    unsafe { _mm256_alignr_epi8::<15>(cur, _mm256_permute2x128_si256::<0x21>(prev, cur)) }
}

#[target_feature(enable = "avx2")]
unsafe fn prev2(cur: __m256i, prev: __m256i) -> __m256i {
    unsafe { _mm256_alignr_epi8::<14>(cur, _mm256_permute2x128_si256::<0x21>(prev, cur)) }
}

#[target_feature(enable = "avx2")]
unsafe fn high_nibbles(v: __m256i) -> __m256i {
    unsafe { _mm256_and_si256(_mm256_srli_epi16::<4>(v), _mm256_set1_epi8(0x0F)) }
}

impl Utf8Checker {
    #[target_feature(enable = "avx2")]
    unsafe fn new() -> Self {
        unsafe {
            let zero = _mm256_setzero_si256();
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

    #[target_feature(enable = "avx2")]
    unsafe fn check_smaller_than_0xf4(&mut self, current: __m256i) {
        unsafe {
            self.has_error = _mm256_or_si256(
                self.has_error,
                _mm256_subs_epu8(current, _mm256_set1_epi8(0xF4u8 as i8)),
            );
        }
    }

    #[target_feature(enable = "avx2")]
    unsafe fn continuation_lengths(nibbles: __m256i) -> __m256i {
        unsafe {
            let table = _mm256_setr_epi8(
                1, 1, 1, 1, 1, 1, 1, 1, 0, 0, 0, 0, 2, 2, 3, 4, //
                1, 1, 1, 1, 1, 1, 1, 1, 0, 0, 0, 0, 2, 2, 3, 4,
            );
            _mm256_shuffle_epi8(table, nibbles)
        }
    }

    #[target_feature(enable = "avx2")]
    unsafe fn carry_continuations(&self, initial_lengths: __m256i) -> __m256i {
        unsafe {
            let right1 = _mm256_subs_epu8(
                prev1(initial_lengths, self.previous.carried_continuations),
                _mm256_set1_epi8(1),
            );
            let sum = _mm256_add_epi8(initial_lengths, right1);
            let right2 = _mm256_subs_epu8(
                prev2(sum, self.previous.carried_continuations),
                _mm256_set1_epi8(2),
            );
            _mm256_add_epi8(sum, right2)
        }
    }

    #[target_feature(enable = "avx2")]
    unsafe fn check_continuations(&mut self, initial_lengths: __m256i, carries: __m256i) {
        unsafe {
            let overunder = _mm256_cmpeq_epi8(
                _mm256_cmpgt_epi8(carries, initial_lengths),
                _mm256_cmpgt_epi8(initial_lengths, _mm256_setzero_si256()),
            );
            self.has_error = _mm256_or_si256(self.has_error, overunder);
        }
    }

    #[target_feature(enable = "avx2")]
    unsafe fn check_first_continuation_max(&mut self, current: __m256i, off1: __m256i) {
        unsafe {
            let prev_ed = _mm256_cmpeq_epi8(off1, _mm256_set1_epi8(0xEDu8 as i8));
            let prev_f4 = _mm256_cmpeq_epi8(off1, _mm256_set1_epi8(0xF4u8 as i8));
            let ed_too_large = _mm256_and_si256(
                _mm256_cmpgt_epi8(current, _mm256_set1_epi8(0x9Fu8 as i8)),
                prev_ed,
            );
            let f4_too_large = _mm256_and_si256(
                _mm256_cmpgt_epi8(current, _mm256_set1_epi8(0x8Fu8 as i8)),
                prev_f4,
            );
            self.has_error = _mm256_or_si256(
                self.has_error,
                _mm256_or_si256(ed_too_large, f4_too_large),
            );
        }
    }

    #[target_feature(enable = "avx2")]
    unsafe fn check_overlong(&mut self, current: __m256i, off1: __m256i, nibbles: __m256i) {
        unsafe {
            let off1_nibbles = prev1(nibbles, self.previous.high_nibbles);
            let initial_mins_table = _mm256_setr_epi8(
                -128, -128, -128, -128, -128, -128, -128, -128, // 0xxx
                -128, -128, -128, -128, // 10xx
                0xC2u8 as i8, -128, // 110x
                0xE1u8 as i8, // 1110
                0xF1u8 as i8, // 1111
                -128, -128, -128, -128, -128, -128, -128, -128, //
                -128, -128, -128, -128, //
                0xC2u8 as i8, -128, //
                0xE1u8 as i8, //
                0xF1u8 as i8,
            );
            let initial_mins = _mm256_shuffle_epi8(initial_mins_table, off1_nibbles);
            let initial_under = _mm256_cmpgt_epi8(initial_mins, off1);

            let second_mins_table = _mm256_setr_epi8(
                -128, -128, -128, -128, -128, -128, -128, -128, // 0xxx
                -128, -128, -128, -128, // 10xx
                127, 127, // 110x, always passes
                0xA0u8 as i8, // 1110
                0x90u8 as i8, // 1111
                -128, -128, -128, -128, -128, -128, -128, -128, //
                -128, -128, -128, -128, //
                127, 127, //
                0xA0u8 as i8, //
                0x90u8 as i8,
            );
            let second_mins = _mm256_shuffle_epi8(second_mins_table, off1_nibbles);
            let second_under = _mm256_cmpgt_epi8(second_mins, current);
            self.has_error = _mm256_or_si256(
                self.has_error,
                _mm256_and_si256(initial_under, second_under),
            );
        }
    }

    #[target_feature(enable = "avx2")]
    unsafe fn check_carried_continuations(&mut self) {
        unsafe {
            let last_1 = _mm256_setr_epi8(
                9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, //
                9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 1,
            );
            self.has_error = _mm256_or_si256(
                self.has_error,
                _mm256_cmpgt_epi8(self.previous.carried_continuations, last_1),
            );
        }
    }

    #[target_feature(enable = "avx2")]
    unsafe fn check_utf8_bytes(&mut self, current: __m256i) {
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
    #[target_feature(enable = "avx2")]
    unsafe fn check_block(&mut self, input: &SimdInput) {
        unsafe {
            let reduced = _mm256_or_si256(input.v[0], input.v[1]);
            if _mm256_movemask_epi8(reduced) != 0 {
                self.check_utf8_bytes(input.v[0]);
                self.check_utf8_bytes(input.v[1]);
            } else {
                self.check_carried_continuations();
                let last = input.v[1];
                self.previous = ProcessedBytes {
                    raw: last,
                    high_nibbles: high_nibbles(last),
                    carried_continuations: _mm256_setzero_si256(),
                };
            }
        }
    }

    #[target_feature(enable = "avx2")]
    unsafe fn finish(&mut self) -> bool {
        unsafe {
            self.check_carried_continuations();
            _mm256_testz_si256(self.has_error, self.has_error) == 1
        }
    }
}

// ============================================================================
// Entry points
// ============================================================================

/// Scan `input` with the AVX2 back-end.
///
/// # Safety
///
/// The CPU must support AVX2, PCLMULQDQ and BMI1.
#[target_feature(enable = "avx2,pclmulqdq,bmi1")]
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

/// Copy a 32-byte window to `dst` and report backslash/quote bitmaps.
#[target_feature(enable = "avx2")]
unsafe fn find_bs_quote(src: *const u8, dst: *mut u8) -> BsQuote {
    unsafe {
        let v = _mm256_loadu_si256(src as *const __m256i);
        // Store unconditionally; bytes we dislike are overwritten or fall
        // past the committed length.
        _mm256_storeu_si256(dst as *mut __m256i, v);
        BsQuote {
            bs: _mm256_movemask_epi8(_mm256_cmpeq_epi8(v, _mm256_set1_epi8(b'\\' as i8))) as u32
                as u64,
            quote: _mm256_movemask_epi8(_mm256_cmpeq_epi8(v, _mm256_set1_epi8(b'"' as i8))) as u32
                as u64,
        }
    }
}

/// Decode the string whose opening quote is at `src_pos` with the AVX2
/// back-end. See [`unescape`](crate::strings::unescape).
///
/// # Safety
///
/// The CPU must support AVX2.
#[target_feature(enable = "avx2")]
pub unsafe fn unescape(input: &Padded, src_pos: usize, out: &mut StringBuffer) -> bool {
    unsafe {
        strings::drive_unescape::<SCAN_WIDTH>(input, src_pos, out, |src, dst| unsafe {
            find_bs_quote(src, dst)
        })
    }
}
