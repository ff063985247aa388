//! Pileup line splitting and numeric parsing.
//!
//! Per-sample input is the samtools `pileup -s` text format: one line per
//! covered coordinate, whitespace-separated fields. These helpers do the
//! field-level work; the typed record lives in [`crate::record`].

use std::io;
use thiserror::Error;

/// Errors that can occur while reading caller input.
#[derive(Error, Debug)]
pub enum PileupError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Parse error at line {line}: {message}")]
    Parse { line: usize, message: String },

    #[error("Cannot open {path}: {source}")]
    Open { path: String, source: io::Error },

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

pub type Result<T> = std::result::Result<T, PileupError>;

/// Split a line on whitespace into exactly `n` fields.
///
/// Fields beyond `n` are ignored; fewer than `n` is a formatting error
/// carrying the line number.
pub fn split_fields(line: &str, n: usize, line_number: usize) -> Result<Vec<&str>> {
    let fields: Vec<&str> = line.split_ascii_whitespace().take(n).collect();
    if fields.len() < n {
        return Err(PileupError::Parse {
            line: line_number,
            message: format!("expected {} fields, got {}", n, fields.len()),
        });
    }
    Ok(fields)
}

/// Fast u64 parsing - no allocation, no error formatting.
///
/// Returns None if the input is empty or contains non-digit characters.
#[inline(always)]
pub fn parse_u64_fast(bytes: &[u8]) -> Option<u64> {
    if bytes.is_empty() {
        return None;
    }
    let mut n: u64 = 0;
    for &b in bytes {
        let d = b.wrapping_sub(b'0');
        if d > 9 {
            return None;
        }
        n = n.wrapping_mul(10).wrapping_add(d as u64);
    }
    Some(n)
}

/// Parse a numeric field, reporting the field name on failure.
pub fn parse_field_u64(s: &str, name: &str, line_number: usize) -> Result<u64> {
    parse_u64_fast(s.as_bytes()).ok_or_else(|| PileupError::Parse {
        line: line_number,
        message: format!("invalid {}: '{}'", name, s),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_fields_exact() {
        let fields = split_fields("chr1\t100\ta", 3, 1).unwrap();
        assert_eq!(fields, vec!["chr1", "100", "a"]);
    }

    #[test]
    fn test_split_fields_extra_ignored() {
        let fields = split_fields("chr1 100 a extra junk", 3, 1).unwrap();
        assert_eq!(fields.len(), 3);
        assert_eq!(fields[2], "a");
    }

    #[test]
    fn test_split_fields_mixed_whitespace() {
        // The upstream format mixes tabs and runs of spaces
        let fields = split_fields("chr22\t16050036  a\t7", 4, 1).unwrap();
        assert_eq!(fields, vec!["chr22", "16050036", "a", "7"]);
    }

    #[test]
    fn test_split_fields_too_few() {
        let err = split_fields("chr1\t100", 3, 42).unwrap_err();
        match err {
            PileupError::Parse { line, .. } => assert_eq!(line, 42),
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_parse_u64_fast() {
        assert_eq!(parse_u64_fast(b"12345"), Some(12345));
        assert_eq!(parse_u64_fast(b"0"), Some(0));
        assert_eq!(parse_u64_fast(b""), None);
        assert_eq!(parse_u64_fast(b"abc"), None);
        assert_eq!(parse_u64_fast(b"123abc"), None);
        assert_eq!(parse_u64_fast(b"18446744073709551615"), Some(u64::MAX));
    }

    #[test]
    fn test_parse_field_u64_error_names_field() {
        let err = parse_field_u64("12x", "position", 7).unwrap_err();
        assert!(err.to_string().contains("position"));
    }
}
