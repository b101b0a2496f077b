//! Scan error taxonomy.

use core::fmt;

/// Errors reported by [`scan`](crate::scan::scan).
///
/// The scanner accumulates error conditions into bitmasks during the sweep
/// and commits to a single code only at end of input; the reporting order is
/// fixed so the same document yields the same code on every back-end:
/// unescaped control characters win over an unclosed string, which wins over
/// a UTF-8 error, which wins over an empty document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanError {
    /// The output buffer is too small for the worst case of one structural
    /// per input byte, or the document is too large to index with 32-bit
    /// offsets (4 GiB).
    Capacity,
    /// No structural bytes were found (empty or all-whitespace input).
    Empty,
    /// A control byte (below 0x20) appeared unescaped inside a string.
    UnescapedChars,
    /// The document ended inside an open string.
    UnclosedString,
    /// The input is not well-formed UTF-8.
    Utf8Error,
    /// An internal invariant failed; indicates a bug, not bad input.
    Unexpected,
}

impl ScanError {
    /// Stable integer code, identical across back-ends. Zero is reserved
    /// for success (the `Ok` arm of the scan result).
    pub fn code(&self) -> u32 {
        match self {
            Self::Capacity => 1,
            Self::Empty => 2,
            Self::UnescapedChars => 3,
            Self::UnclosedString => 4,
            Self::Utf8Error => 5,
            Self::Unexpected => 6,
        }
    }
}

impl fmt::Display for ScanError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Capacity => write!(f, "structural index buffer too small for input"),
            Self::Empty => write!(f, "no structural characters found"),
            Self::UnescapedChars => {
                write!(f, "unescaped control character inside string")
            }
            Self::UnclosedString => write!(f, "unclosed string at end of input"),
            Self::Utf8Error => write!(f, "invalid UTF-8 sequence"),
            Self::Unexpected => write!(f, "internal scanner invariant failed"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for ScanError {}
