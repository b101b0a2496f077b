//! Property-based tests for scanning and string decoding.
//!
//! These use proptest to verify the structural invariants hold for
//! arbitrary inputs, not just the curated scenarios.

use proptest::prelude::*;

use jsonscan::{Padded, StringBuffer, StructuralIndexes, scan, unescape};

const WHITESPACE: [u8; 4] = [b' ', b'\t', b'\n', b'\r'];

fn scan_once(input: &[u8]) -> Result<Vec<u32>, u32> {
    let padded = Padded::from(input);
    let mut out = StructuralIndexes::with_capacity_for(padded.len());
    scan(&padded, &mut out)
        .map(|()| out.as_slice().to_vec())
        .map_err(|e| e.code())
}

/// Serialize `s` as a JSON string literal, escaping what RFC 8259 requires.
fn escape_json(s: &str) -> Vec<u8> {
    let mut out = vec![b'"'];
    for c in s.chars() {
        match c {
            '"' => out.extend_from_slice(b"\\\""),
            '\\' => out.extend_from_slice(b"\\\\"),
            '\n' => out.extend_from_slice(b"\\n"),
            '\t' => out.extend_from_slice(b"\\t"),
            '\r' => out.extend_from_slice(b"\\r"),
            c if (c as u32) < 0x20 => {
                out.extend_from_slice(format!("\\u{:04X}", c as u32).as_bytes());
            }
            c => {
                let mut buf = [0u8; 4];
                out.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
            }
        }
    }
    out.push(b'"');
    out
}

proptest! {
    /// The structural-offset array is strictly monotonic and ends with the
    /// sentinel, for every input that scans successfully.
    #[test]
    fn prop_offsets_strictly_monotonic(bytes in prop::collection::vec(any::<u8>(), 0..300)) {
        if let Ok(offsets) = scan_once(&bytes) {
            prop_assert!(!offsets.is_empty());
            for pair in offsets.windows(2) {
                prop_assert!(pair[0] < pair[1], "non-monotonic: {:?}", offsets);
            }
            prop_assert_eq!(*offsets.last().unwrap() as usize, bytes.len());
        }
    }

    /// The first structural offset is the first non-whitespace byte.
    #[test]
    fn prop_first_offset_is_first_non_whitespace(
        bytes in prop::collection::vec(any::<u8>(), 0..300)
    ) {
        if let Ok(offsets) = scan_once(&bytes) {
            let first_non_ws = bytes.iter().position(|b| !WHITESPACE.contains(b));
            prop_assert_eq!(Some(offsets[0] as usize), first_non_ws);
        }
    }

    /// Scanning the same input twice yields identical output and the same
    /// error code, reusing the same output buffer.
    #[test]
    fn prop_scan_is_idempotent(bytes in prop::collection::vec(any::<u8>(), 0..300)) {
        let padded = Padded::from(bytes.as_slice());
        let mut out = StructuralIndexes::with_capacity_for(padded.len());
        let first = scan(&padded, &mut out).map(|()| out.as_slice().to_vec());
        let second = scan(&padded, &mut out).map(|()| out.as_slice().to_vec());
        prop_assert_eq!(first, second);
    }

    /// The dispatching entry point always agrees with the scalar reference.
    #[test]
    fn prop_dispatcher_matches_scalar(bytes in prop::collection::vec(any::<u8>(), 0..300)) {
        let padded = Padded::from(bytes.as_slice());
        let mut a = StructuralIndexes::with_capacity_for(padded.len());
        let mut b = StructuralIndexes::with_capacity_for(padded.len());
        let dispatched = scan(&padded, &mut a)
            .map(|()| a.as_slice().to_vec())
            .map_err(|e| e.code());
        let scalar = jsonscan::scan::scalar::scan(&padded, &mut b)
            .map(|()| b.as_slice().to_vec())
            .map_err(|e| e.code());
        prop_assert_eq!(dispatched, scalar);
    }

    /// Escaping an arbitrary string as JSON and unescaping it returns the
    /// original bytes, and the wrapped document scans cleanly.
    #[test]
    fn prop_unescape_inverts_escape(s in ".*") {
        let json = escape_json(&s);
        prop_assert_eq!(scan_once(&json), Ok(vec![0, json.len() as u32]));

        let padded = Padded::from(json.as_slice());
        let mut strings = StringBuffer::new();
        prop_assert!(unescape(&padded, 0, &mut strings));
        prop_assert_eq!(strings.get(0), Some(s.as_bytes()));
    }

    /// A well-formed UTF-8 string passed through raw (no escapes needed)
    /// comes back byte-identical.
    #[test]
    fn prop_raw_string_roundtrip(s in "[a-zA-Z0-9 .,:-]*") {
        let mut json = vec![b'"'];
        json.extend_from_slice(s.as_bytes());
        json.push(b'"');

        let padded = Padded::from(json.as_slice());
        let mut strings = StringBuffer::new();
        prop_assert!(unescape(&padded, 0, &mut strings));
        prop_assert_eq!(strings.get(0), Some(s.as_bytes()));
    }

    /// Any non-surrogate code point survives a trip through `\u` escapes
    /// (BMP directly, the rest as a surrogate pair).
    #[test]
    fn prop_codepoint_roundtrip(c in any::<char>()) {
        let mut units = [0u16; 2];
        let mut json = String::from("\"");
        for unit in c.encode_utf16(&mut units).iter() {
            json.push_str(&format!("\\u{:04X}", unit));
        }
        json.push('"');

        let padded = Padded::from(json.as_str());
        let mut strings = StringBuffer::new();
        prop_assert!(unescape(&padded, 0, &mut strings));

        let mut expected = [0u8; 4];
        prop_assert_eq!(
            strings.get(0),
            Some(c.encode_utf8(&mut expected).as_bytes())
        );
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Valid generated documents always scan successfully, and every
    /// structural offset that points at a quote decodes.
    #[test]
    fn prop_generated_documents_scan(
        keys in prop::collection::vec("[a-z]{1,8}", 1..8),
        values in prop::collection::vec(any::<i32>(), 1..8)
    ) {
        let mut doc = String::from("{");
        for (i, (k, v)) in keys.iter().zip(values.iter().cycle()).enumerate() {
            if i > 0 {
                doc.push(',');
            }
            doc.push_str(&format!("\"{k}{i}\": {v}"));
        }
        doc.push('}');

        let padded = Padded::from(doc.as_str());
        let mut out = StructuralIndexes::with_capacity_for(padded.len());
        prop_assert!(scan(&padded, &mut out).is_ok());

        let mut strings = StringBuffer::new();
        for &offset in &out.as_slice()[..out.len() - 1] {
            if padded.bytes()[offset as usize] == b'"' {
                prop_assert!(unescape(&padded, offset as usize, &mut strings));
            }
        }
    }
}
