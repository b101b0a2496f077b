//! End-to-end scanning scenarios and boundary cases.

use jsonscan::{Padded, ScanError, StringBuffer, StructuralIndexes, scan, unescape};

fn scan_vec(input: &[u8]) -> Result<Vec<u32>, ScanError> {
    let padded = Padded::from(input);
    let mut out = StructuralIndexes::with_capacity_for(padded.len());
    scan(&padded, &mut out).map(|()| out.as_slice().to_vec())
}

fn decode(input: &[u8], src_pos: usize) -> Option<Vec<u8>> {
    let padded = Padded::from(input);
    let mut strings = StringBuffer::new();
    if !unescape(&padded, src_pos, &mut strings) {
        return None;
    }
    strings.get(0).map(|s| s.to_vec())
}

// ============================================================================
// Seed scenarios
// ============================================================================

#[test]
fn test_empty_object() {
    assert_eq!(scan_vec(b"{}"), Ok(vec![0, 1, 2]));
}

#[test]
fn test_array_with_whitespace() {
    // `[`, `1`, `,`, `2`, `,`, the opening quote of "x", `]`, sentinel.
    assert_eq!(
        scan_vec(b"  [1, 2 , \"x\"]"),
        Ok(vec![2, 3, 4, 6, 8, 10, 13, 14])
    );
    assert_eq!(decode(b"  [1, 2 , \"x\"]", 10), Some(b"x".to_vec()));
}

#[test]
fn test_escaped_quote_inside_string() {
    let json = br#""a\"b""#;
    assert_eq!(scan_vec(json), Ok(vec![0, 6]));
    assert_eq!(decode(json, 0), Some(b"a\"b".to_vec()));
}

#[test]
fn test_surrogate_pair_decodes_to_emoji() {
    let json = br#""\uD83D\uDE00""#;
    assert_eq!(json.len(), 14);
    assert_eq!(scan_vec(json), Ok(vec![0, 14]));
    assert_eq!(decode(json, 0), Some(vec![0xF0, 0x9F, 0x98, 0x80]));
}

#[test]
fn test_unpaired_high_surrogate_scans_but_fails_decode() {
    let json = br#""\uD83D""#;
    assert_eq!(scan_vec(json), Ok(vec![0, 8]));
    assert_eq!(decode(json, 0), None);
}

#[test]
fn test_control_byte_inside_string() {
    assert_eq!(scan_vec(b"\"\x01\""), Err(ScanError::UnescapedChars));
}

#[test]
fn test_unclosed_structure_is_not_the_scanners_concern() {
    // Unbalanced braces are the tape builder's problem; the scan succeeds.
    assert_eq!(scan_vec(b"[1"), Ok(vec![0, 1, 2]));
}

#[test]
fn test_unclosed_string() {
    assert_eq!(scan_vec(b"\"ab"), Err(ScanError::UnclosedString));
}

#[test]
fn test_overlong_two_byte_sequence() {
    assert_eq!(scan_vec(b"\xC0\x80"), Err(ScanError::Utf8Error));
}

#[test]
fn test_surrogate_encoded_as_utf8() {
    assert_eq!(scan_vec(b"\xED\xA0\x80"), Err(ScanError::Utf8Error));
}

// ============================================================================
// Error ordering and capacity
// ============================================================================

#[test]
fn test_empty_and_whitespace_only_input() {
    assert_eq!(scan_vec(b""), Err(ScanError::Empty));
    assert_eq!(scan_vec(b"   "), Err(ScanError::Empty));
    assert_eq!(scan_vec(b" \t\r\n "), Err(ScanError::Empty));
}

#[test]
fn test_control_char_error_wins_over_unclosed_string() {
    assert_eq!(scan_vec(b"\"\x01"), Err(ScanError::UnescapedChars));
}

#[test]
fn test_unclosed_string_wins_over_utf8_error() {
    let mut json = b"\"ab".to_vec();
    json.extend_from_slice(b"\xC0\x80");
    assert_eq!(scan_vec(&json), Err(ScanError::UnclosedString));
}

#[test]
fn test_utf8_error_wins_over_empty() {
    // No structural would survive, but the UTF-8 verdict is reported first.
    assert_eq!(scan_vec(b" \xFF "), Err(ScanError::Utf8Error));
}

#[test]
fn test_error_codes_are_stable() {
    assert_eq!(scan_vec(b"").unwrap_err().code(), 2);
    assert_eq!(scan_vec(b"\"\x01\"").unwrap_err().code(), 3);
    assert_eq!(scan_vec(b"\"ab").unwrap_err().code(), 4);
    assert_eq!(scan_vec(b"\xC0\x80").unwrap_err().code(), 5);
}

#[test]
fn test_capacity_error() {
    let padded = Padded::from("{}");
    let mut out = StructuralIndexes::with_capacity_for(0);
    assert_eq!(scan(&padded, &mut out), Err(ScanError::Capacity));
}

// ============================================================================
// Boundary lengths
// ============================================================================

#[test]
fn test_single_byte_inputs() {
    assert_eq!(scan_vec(b"1"), Ok(vec![0, 1]));
    assert_eq!(scan_vec(b"{"), Ok(vec![0, 1]));
    assert_eq!(scan_vec(b" "), Err(ScanError::Empty));
}

#[test]
fn test_block_boundary_lengths() {
    // A single primitive padded with trailing whitespace to lengths that
    // straddle the 64-byte block size and a 64 KiB document.
    for len in [1, 63, 64, 65, 127, 128, 129, 65535, 65536, 65537] {
        let mut json = vec![b'1'];
        json.resize(len, b' ');
        assert_eq!(scan_vec(&json), Ok(vec![0, len as u32]), "trailing, len {len}");

        let mut json = vec![b' '; len];
        json[len - 1] = b'1';
        assert_eq!(
            scan_vec(&json),
            Ok(vec![len as u32 - 1, len as u32]),
            "leading, len {len}"
        );
    }
}

#[test]
fn test_final_byte_in_each_token_kind() {
    // Ends inside a number.
    assert_eq!(scan_vec(b"123"), Ok(vec![0, 3]));
    // Ends inside whitespace.
    assert_eq!(scan_vec(b"1 "), Ok(vec![0, 2]));
    // Ends at a closing brace.
    assert_eq!(scan_vec(b"{\"a\":1}"), Ok(vec![0, 1, 4, 5, 6, 7]));
    // Ends inside a string.
    assert_eq!(scan_vec(b"\"abc"), Err(ScanError::UnclosedString));
}

#[test]
fn test_string_spans_block_boundary() {
    // Opening quote in the first block, closing quote in the second.
    for content_len in [55, 60, 61, 62, 63, 64, 70, 130] {
        let mut json = vec![b'['];
        json.push(b'"');
        json.resize(2 + content_len, b'v');
        json.push(b'"');
        json.push(b']');
        let len = json.len() as u32;
        assert_eq!(
            scan_vec(&json),
            Ok(vec![0, 1, len - 1, len]),
            "content len {content_len}"
        );
    }
}

#[test]
fn test_backslash_runs_at_block_boundaries() {
    // Runs of 0..=10 backslashes positioned so they straddle the 64-byte
    // boundary (offsets 58..=66), always forming valid escapes; the decoded
    // string must resolve the run exactly.
    for run in 0..=10usize {
        for pad in 58..=66usize {
            let mut json = vec![b'"'];
            json.resize(1 + pad, b'a');
            json.extend(std::iter::repeat_n(b'\\', run));
            json.extend_from_slice(b"bc\"");

            let len = json.len() as u32;
            assert_eq!(scan_vec(&json), Ok(vec![0, len]), "run {run} pad {pad}");

            let mut expected = vec![b'a'; pad];
            expected.extend(std::iter::repeat_n(b'\\', run / 2));
            if run % 2 == 1 {
                // The trailing backslash escapes the `b`: backspace.
                expected.push(0x08);
            } else {
                expected.push(b'b');
            }
            expected.push(b'c');
            assert_eq!(decode(&json, 0), Some(expected), "run {run} pad {pad}");
        }
    }
}

#[test]
fn test_structurals_after_string_with_escapes() {
    // The escaped quote must not terminate the string early, or the `:` and
    // `1` inside it would leak out as structurals.
    let json = br#"{"a\":x":1}"#;
    assert_eq!(scan_vec(json), Ok(vec![0, 1, 8, 9, 10, 11]));
}

// ============================================================================
// Idempotence
// ============================================================================

#[test]
fn test_scan_is_idempotent() {
    let padded = Padded::from(r#"{"k":[1,2,{"n":null}],"s":"A"}"#);
    let mut out = StructuralIndexes::with_capacity_for(padded.len());
    scan(&padded, &mut out).unwrap();
    let first = out.as_slice().to_vec();
    scan(&padded, &mut out).unwrap();
    assert_eq!(out.as_slice(), first.as_slice());
}

#[test]
fn test_scan_reports_same_error_twice() {
    let padded = Padded::from_slice(b"\"ab");
    let mut out = StructuralIndexes::with_capacity_for(padded.len());
    assert_eq!(scan(&padded, &mut out), Err(ScanError::UnclosedString));
    assert_eq!(scan(&padded, &mut out), Err(ScanError::UnclosedString));
}
