//! Parsed config blocks and their typed accessors.
//!
//! Accessors never fail: a missing key yields the default, and an
//! out-of-range or malformed value logs a warning and yields the default.
//! Key lookup is case-insensitive; insertion order is preserved.

use crate::error::FilePosition;
use crate::util;

/// One `<name key="value" ...>` block.
#[derive(Debug, Clone)]
pub struct ConfigTag {
    name: String,
    source: FilePosition,
    items: Vec<(String, String)>,
}

impl ConfigTag {
    pub fn new(name: impl Into<String>, source: FilePosition) -> Self {
        Self { name: name.into(), source, items: Vec::new() }
    }

    /// A tag with no items, used where config lookup found nothing so
    /// every accessor falls through to its default.
    pub fn empty(name: impl Into<String>) -> Self {
        Self::new(name, FilePosition::new("<missing>", 0, 0))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn source(&self) -> &FilePosition {
        &self.source
    }

    pub fn items(&self) -> &[(String, String)] {
        &self.items
    }

    /// Insert a key. Returns false if the key already exists.
    pub fn insert(&mut self, key: String, value: String) -> bool {
        if self.items.iter().any(|(k, _)| k.eq_ignore_ascii_case(&key)) {
            return false;
        }
        self.items.push((key, value));
        true
    }

    /// Raw string lookup. Unless `allow_lf`, embedded linefeeds are
    /// replaced with spaces and a warning is logged.
    pub fn read_string(&self, key: &str, allow_lf: bool) -> Option<String> {
        let (_, value) = self
            .items
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))?;
        let mut value = value.clone();
        if !allow_lf && value.contains('\n') {
            tracing::warn!(
                tag = %self.name,
                key,
                source = %self.source,
                "value contains a linefeed, stripped to spaces"
            );
            value = value.replace('\n', " ");
        }
        Some(value)
    }

    pub fn get_string(&self, key: &str, default: &str) -> String {
        self.read_string(key, false)
            .unwrap_or_else(|| default.to_string())
    }

    /// String accessor with a caller-supplied validator.
    pub fn get_string_checked(
        &self,
        key: &str,
        default: &str,
        validator: impl Fn(&str) -> bool,
    ) -> String {
        match self.read_string(key, false) {
            Some(v) if validator(&v) => v,
            Some(_) => {
                tracing::warn!(
                    tag = %self.name, key,
                    "value is not valid; using {default:?}"
                );
                default.to_string()
            }
            None => default.to_string(),
        }
    }

    /// String accessor bounded by length.
    pub fn get_string_bounded(
        &self,
        key: &str,
        default: &str,
        min_len: usize,
        max_len: usize,
    ) -> String {
        match self.read_string(key, false) {
            Some(v) if v.len() >= min_len && v.len() <= max_len => v,
            Some(_) => {
                tracing::warn!(
                    tag = %self.name, key,
                    "length is not between {min_len} and {max_len}; using {default:?}"
                );
                default.to_string()
            }
            None => default.to_string(),
        }
    }

    pub fn get_int(&self, key: &str, default: i64, min: i64, max: i64) -> i64 {
        let Some(raw) = self.read_string(key, false).filter(|s| !s.is_empty()) else {
            return default;
        };
        let Some((value, tail)) = parse_c_int(&raw) else {
            return default;
        };
        let value = self.apply_magnitude(key, &raw, value, default, tail);
        self.check_range(key, value, default, min, max)
    }

    pub fn get_uint(&self, key: &str, default: u64, min: u64, max: u64) -> u64 {
        let Some(raw) = self.read_string(key, false).filter(|s| !s.is_empty()) else {
            return default;
        };
        let Some((value, tail)) = parse_c_int(&raw) else {
            return default;
        };
        if value < 0 {
            tracing::warn!(tag = %self.name, key, value = %raw, "value is negative; using {default}");
            return default;
        }
        let value = self.apply_magnitude(key, &raw, value, default.min(i64::MAX as u64) as i64, tail);
        let value = value.max(0) as u64;
        if (min..=max).contains(&value) {
            return value;
        }
        tracing::warn!(
            tag = %self.name, key,
            "value {value} is not between {min} and {max}; using {default}"
        );
        default
    }

    /// Duration accessor accepting `1y2w3d4h5m6s` composite forms.
    pub fn get_duration(&self, key: &str, default: u64, min: u64, max: u64) -> u64 {
        let Some(raw) = self.read_string(key, false).filter(|s| !s.is_empty()) else {
            return default;
        };
        match util::parse_duration(&raw) {
            Some(v) if (min..=max).contains(&v) => v,
            Some(v) => {
                tracing::warn!(
                    tag = %self.name, key,
                    "value {v} is not between {min} and {max}; using {default}"
                );
                default
            }
            None => {
                tracing::warn!(
                    tag = %self.name, key, value = %raw,
                    source = %self.source,
                    "value is not a duration; using {default}"
                );
                default
            }
        }
    }

    pub fn get_float(&self, key: &str, default: f64, min: f64, max: f64) -> f64 {
        let Some(raw) = self.read_string(key, false) else {
            return default;
        };
        let value = raw.trim().parse::<f64>().unwrap_or(default);
        if value < min || value > max {
            tracing::warn!(
                tag = %self.name, key,
                "value {value} is not between {min} and {max}; using {default}"
            );
            return default;
        }
        value
    }

    /// Accepts yes/no, true/false, on/off in any case.
    pub fn get_bool(&self, key: &str, default: bool) -> bool {
        let Some(raw) = self.read_string(key, false).filter(|s| !s.is_empty()) else {
            return default;
        };
        if ["yes", "true", "on"].iter().any(|w| raw.eq_ignore_ascii_case(w)) {
            return true;
        }
        if ["no", "false", "off"].iter().any(|w| raw.eq_ignore_ascii_case(w)) {
            return false;
        }
        tracing::warn!(
            tag = %self.name, key, value = %raw,
            source = %self.source,
            "value is not a boolean, ignoring"
        );
        default
    }

    fn apply_magnitude(&self, key: &str, raw: &str, value: i64, default: i64, tail: &str) -> i64 {
        if tail.is_empty() {
            return value;
        }
        match tail.chars().next().map(|c| c.to_ascii_uppercase()) {
            Some('K') => value.saturating_mul(1024),
            Some('M') => value.saturating_mul(1024 * 1024),
            Some('G') => value.saturating_mul(1024 * 1024 * 1024),
            _ => {
                tracing::warn!(
                    tag = %self.name, key, value = %raw,
                    "invalid magnitude specifier {tail:?}; using {default}"
                );
                default
            }
        }
    }

    fn check_range(&self, key: &str, value: i64, default: i64, min: i64, max: i64) -> i64 {
        if (min..=max).contains(&value) {
            return value;
        }
        tracing::warn!(
            tag = %self.name, key,
            "value {value} is not between {min} and {max}; using {default}"
        );
        default
    }
}

/// C-style integer prefix parse: optional sign, `0x` hex, leading-zero
/// octal, else decimal. Returns the value and the unparsed tail, or
/// `None` when no digits were consumed.
fn parse_c_int(s: &str) -> Option<(i64, &str)> {
    let s = s.trim();
    let (neg, body) = match s.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, s.strip_prefix('+').unwrap_or(s)),
    };

    let (radix, digits) = if let Some(hex) = body.strip_prefix("0x").or_else(|| body.strip_prefix("0X")) {
        (16, hex)
    } else if body.len() > 1 && body.starts_with('0') {
        (8, &body[1..])
    } else {
        (10, body)
    };

    let end = digits
        .char_indices()
        .take_while(|(_, c)| c.is_digit(radix))
        .last()
        .map(|(i, c)| i + c.len_utf8())?;

    let mut value = i64::from_str_radix(&digits[..end], radix).ok()?;
    if neg {
        value = -value;
    }
    Some((value, &digits[end..]))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tag(pairs: &[(&str, &str)]) -> ConfigTag {
        let mut t = ConfigTag::new("test", FilePosition::new("test.conf", 1, 1));
        for (k, v) in pairs {
            assert!(t.insert(k.to_string(), v.to_string()));
        }
        t
    }

    #[test]
    fn key_lookup_is_case_insensitive() {
        let t = tag(&[("Name", "alice")]);
        assert_eq!(t.get_string("name", ""), "alice");
        assert_eq!(t.get_string("NAME", ""), "alice");
    }

    #[test]
    fn duplicate_keys_rejected() {
        let mut t = ConfigTag::new("test", FilePosition::new("t", 1, 1));
        assert!(t.insert("key".into(), "a".into()));
        assert!(!t.insert("KEY".into(), "b".into()));
    }

    #[test]
    fn linefeed_is_stripped_to_space() {
        let t = tag(&[("motd", "line one\nline two")]);
        assert_eq!(t.get_string("motd", ""), "line one line two");
        assert_eq!(t.read_string("motd", true).unwrap(), "line one\nline two");
    }

    #[test]
    fn int_accepts_c_style_radixes() {
        let t = tag(&[("hex", "0x1F"), ("oct", "017"), ("dec", "42"), ("neg", "-7")]);
        assert_eq!(t.get_int("hex", 0, i64::MIN, i64::MAX), 31);
        assert_eq!(t.get_int("oct", 0, i64::MIN, i64::MAX), 15);
        assert_eq!(t.get_int("dec", 0, i64::MIN, i64::MAX), 42);
        assert_eq!(t.get_int("neg", 0, i64::MIN, i64::MAX), -7);
    }

    #[test]
    fn int_magnitude_suffixes() {
        let t = tag(&[("k", "2K"), ("m", "1M"), ("g", "1g"), ("bad", "3Q")]);
        assert_eq!(t.get_int("k", 0, 0, i64::MAX), 2048);
        assert_eq!(t.get_int("m", 0, 0, i64::MAX), 1024 * 1024);
        assert_eq!(t.get_int("g", 0, 0, i64::MAX), 1024 * 1024 * 1024);
        // Bad magnitude falls back to the default.
        assert_eq!(t.get_int("bad", 5, 0, i64::MAX), 5);
    }

    #[test]
    fn int_out_of_range_uses_default() {
        let t = tag(&[("n", "100")]);
        assert_eq!(t.get_int("n", 7, 0, 50), 7);
        assert_eq!(t.get_int("n", 7, 0, 200), 100);
        assert_eq!(t.get_int("missing", 7, 0, 50), 7);
    }

    #[test]
    fn duration_composite() {
        let t = tag(&[("d", "1h30m"), ("plain", "90"), ("bad", "soon")]);
        assert_eq!(t.get_duration("d", 0, 0, u64::MAX), 5400);
        assert_eq!(t.get_duration("plain", 0, 0, u64::MAX), 90);
        assert_eq!(t.get_duration("bad", 11, 0, u64::MAX), 11);
        assert_eq!(t.get_duration("missing", 11, 0, u64::MAX), 11);
    }

    #[test]
    fn bool_spellings() {
        let t = tag(&[("a", "yes"), ("b", "OFF"), ("c", "True"), ("d", "maybe")]);
        assert!(t.get_bool("a", false));
        assert!(!t.get_bool("b", true));
        assert!(t.get_bool("c", false));
        assert!(t.get_bool("d", false));
        assert!(!t.get_bool("d", false));
        assert!(t.get_bool("missing", true));
    }

    #[test]
    fn string_validator_and_bounds() {
        let t = tag(&[("host", "Bad Host"), ("short", "ab")]);
        assert_eq!(
            t.get_string_checked("host", "fallback", |s| !s.contains(' ')),
            "fallback"
        );
        assert_eq!(t.get_string_bounded("short", "dft", 3, 10), "dft");
        assert_eq!(t.get_string_bounded("short", "dft", 1, 10), "ab");
    }

    #[test]
    fn float_range() {
        let t = tag(&[("f", "2.5")]);
        assert_eq!(t.get_float("f", 0.0, 0.0, 10.0), 2.5);
        assert_eq!(t.get_float("f", 1.0, 0.0, 2.0), 1.0);
    }
}
