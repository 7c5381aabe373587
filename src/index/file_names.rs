//! Segment file naming.
//!
//! Every file of a segment is named `<segment>[_<suffix>].<ext>`. Segment names
//! are `_` followed by a base-36 generation and never contain another `_` or a
//! `.`, so the owning segment can always be recovered from a file name.

use crate::error::{PilumError, Result};

/// Extension of the segment descriptor.
pub const SEGMENT_INFO_EXTENSION: &str = "si";

/// Build `<segment>[_<suffix>].<ext>`.
///
/// ```
/// use pilum::index::file_names::segment_file_name;
///
/// assert_eq!(segment_file_name("_0", "", "si"), "_0.si");
/// assert_eq!(segment_file_name("_0", "Columnar10_0", "dvd"), "_0_Columnar10_0.dvd");
/// ```
pub fn segment_file_name(segment: &str, suffix: &str, ext: &str) -> String {
    let mut name = String::with_capacity(segment.len() + suffix.len() + ext.len() + 2);
    name.push_str(segment);
    if !suffix.is_empty() {
        name.push('_');
        name.push_str(suffix);
    }
    if !ext.is_empty() {
        name.push('.');
        name.push_str(ext);
    }
    name
}

/// Segment name for a generation: `_` followed by the generation in base 36.
pub fn segment_name(generation: u64) -> String {
    format!("_{}", to_base36(generation))
}

/// Parse the generation back out of a segment name.
pub fn parse_generation(segment: &str) -> Result<u64> {
    let digits = segment
        .strip_prefix('_')
        .filter(|d| !d.is_empty())
        .ok_or_else(|| PilumError::invalid_argument(format!("invalid segment name {segment:?}")))?;
    u64::from_str_radix(digits, 36)
        .map_err(|e| PilumError::invalid_argument(format!("invalid segment name {segment:?}: {e}")))
}

fn to_base36(mut value: u64) -> String {
    const DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if value == 0 {
        return "0".to_string();
    }
    let mut buf = Vec::new();
    while value > 0 {
        buf.push(DIGITS[(value % 36) as usize]);
        value /= 36;
    }
    buf.reverse();
    buf.into_iter().map(char::from).collect()
}

/// The segment name a file belongs to.
///
/// Takes the text before the first `.`, then cuts it at the first `_` after
/// index 0.
pub fn parse_segment_name(file_name: &str) -> &str {
    let stem = match file_name.find('.') {
        Some(dot) => &file_name[..dot],
        None => file_name,
    };
    match stem[1.min(stem.len())..].find('_') {
        Some(pos) => &stem[..pos + 1],
        None => stem,
    }
}

/// Remove the leading segment name: `_0_Columnar10_0.dvd` becomes
/// `_Columnar10_0.dvd` and `_0.si` becomes `.si`.
pub fn strip_segment_name(file_name: &str) -> &str {
    &file_name[parse_segment_name(file_name).len()..]
}

/// Whether `file_name` belongs to `segment`.
pub fn matches_segment(file_name: &str, segment: &str) -> bool {
    parse_segment_name(file_name) == segment
}

/// Extension of `file_name`, the text after its last `.`, if any.
pub fn file_extension(file_name: &str) -> Option<&str> {
    file_name.rfind('.').map(|dot| &file_name[dot + 1..])
}

/// Check that `segment` is a well-formed segment name.
pub fn validate_segment_name(segment: &str) -> Result<()> {
    let valid = segment.len() > 1
        && segment.starts_with('_')
        && segment[1..]
            .bytes()
            .all(|b| b.is_ascii_digit() || b.is_ascii_lowercase());
    if valid {
        Ok(())
    } else {
        Err(PilumError::invalid_argument(format!(
            "invalid segment name {segment:?}: expected '_' followed by base-36 digits"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_segment_file_name() {
        assert_eq!(segment_file_name("_0", "", "si"), "_0.si");
        assert_eq!(segment_file_name("_a", "BlockPostings10_1", "tim"), "_a_BlockPostings10_1.tim");
        assert_eq!(segment_file_name("_3", "", ""), "_3");
    }

    #[test]
    fn test_segment_names() {
        assert_eq!(segment_name(0), "_0");
        assert_eq!(segment_name(10), "_a");
        assert_eq!(segment_name(36), "_10");
        assert_eq!(parse_generation("_10").unwrap(), 36);
        assert!(parse_generation("_").is_err());
        assert!(parse_generation("x1").is_err());
    }

    #[test]
    fn test_parse_segment_name() {
        assert_eq!(parse_segment_name("_0.si"), "_0");
        assert_eq!(parse_segment_name("_0_Columnar10_0.dvd"), "_0");
        assert_eq!(parse_segment_name("_12.cfs"), "_12");
        assert_eq!(parse_segment_name("_12"), "_12");
        assert_eq!(parse_segment_name(""), "");
    }

    #[test]
    fn test_strip_segment_name() {
        assert_eq!(strip_segment_name("_0_Columnar10_0.dvd"), "_Columnar10_0.dvd");
        assert_eq!(strip_segment_name("_0.si"), ".si");
    }

    #[test]
    fn test_matches_and_extension() {
        assert!(matches_segment("_0_x.dvd", "_0"));
        assert!(!matches_segment("_01.dvd", "_0"));
        assert!(!matches_segment("_1.si", "_0"));
        assert_eq!(file_extension("_0_x.dvd"), Some("dvd"));
        assert_eq!(file_extension("_0"), None);
    }

    #[test]
    fn test_validate_segment_name() {
        assert!(validate_segment_name("_0").is_ok());
        assert!(validate_segment_name("_az9").is_ok());
        assert!(validate_segment_name("_").is_err());
        assert!(validate_segment_name("_0_1").is_err());
        assert!(validate_segment_name("_A").is_err());
    }
}
