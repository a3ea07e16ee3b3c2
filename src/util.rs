//! Shared protocol helpers: casemapping, wildcard matching, durations.

/// Lowercase a single character under RFC 1459 casemapping.
///
/// Beyond ASCII, `[`/`]`/`\`/`~` are the uppercase forms of `{`/`}`/`|`/`^`
/// because of how Scandinavian letters mapped onto the original charset.
pub fn irc_lower_char(c: char) -> char {
    match c {
        'A'..='Z' => c.to_ascii_lowercase(),
        '[' => '{',
        ']' => '}',
        '\\' => '|',
        '~' => '^',
        _ => c,
    }
}

/// Fold a string for case-insensitive comparison or index keys.
pub fn irc_fold(s: &str) -> String {
    s.chars().map(irc_lower_char).collect()
}

/// Compare two strings under RFC 1459 casemapping.
pub fn irc_eq(a: &str, b: &str) -> bool {
    a.len() == b.len()
        && a.chars()
            .zip(b.chars())
            .all(|(x, y)| irc_lower_char(x) == irc_lower_char(y))
}

/// Case-insensitive glob match with `*` and `?`, folding both sides.
pub fn wildcard_match(pattern: &str, text: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().map(irc_lower_char).collect();
    let text: Vec<char> = text.chars().map(irc_lower_char).collect();
    wildcard_match_impl(&pattern, &text)
}

/// Iterative matcher with single-star backtracking.
fn wildcard_match_impl(pattern: &[char], text: &[char]) -> bool {
    let mut p = 0;
    let mut t = 0;
    let mut star_p = None;
    let mut star_t = 0;

    while t < text.len() {
        if p < pattern.len() && (pattern[p] == '?' || pattern[p] == text[t]) {
            p += 1;
            t += 1;
        } else if p < pattern.len() && pattern[p] == '*' {
            star_p = Some(p);
            star_t = t;
            p += 1;
        } else if let Some(sp) = star_p {
            p = sp + 1;
            star_t += 1;
            t = star_t;
        } else {
            return false;
        }
    }

    while p < pattern.len() && pattern[p] == '*' {
        p += 1;
    }

    p == pattern.len()
}

const DUR_YEAR: u64 = 31_449_600; // 52 weeks
const DUR_WEEK: u64 = 604_800;
const DUR_DAY: u64 = 86_400;
const DUR_HOUR: u64 = 3_600;
const DUR_MIN: u64 = 60;

/// Parse a composite duration like `1y2w3d4h5m6s`.
///
/// A bare trailing number counts as seconds, so `"300"` is five minutes and
/// `"1h30"` is ninety minutes. Returns `None` on any unrecognised character.
pub fn parse_duration(s: &str) -> Option<u64> {
    if s.is_empty() {
        return None;
    }

    let mut total: u64 = 0;
    let mut number: u64 = 0;
    let mut seen_digit = false;
    for c in s.chars() {
        if let Some(d) = c.to_digit(10) {
            number = number.checked_mul(10)?.checked_add(u64::from(d))?;
            seen_digit = true;
            continue;
        }
        if !seen_digit {
            return None;
        }
        let mult = match c.to_ascii_lowercase() {
            'y' => DUR_YEAR,
            'w' => DUR_WEEK,
            'd' => DUR_DAY,
            'h' => DUR_HOUR,
            'm' => DUR_MIN,
            's' => 1,
            _ => return None,
        };
        total = total.checked_add(number.checked_mul(mult)?)?;
        number = 0;
        seen_digit = false;
    }
    // Trailing bare number is seconds.
    total = total.checked_add(number)?;
    Some(total)
}

/// Render a duration in the same composite notation.
pub fn duration_string(mut secs: u64) -> String {
    if secs == 0 {
        return "0s".to_string();
    }
    let mut out = String::new();
    for (unit, label) in [
        (DUR_YEAR, 'y'),
        (DUR_WEEK, 'w'),
        (DUR_DAY, 'd'),
        (DUR_HOUR, 'h'),
        (DUR_MIN, 'm'),
        (1, 's'),
    ] {
        let n = secs / unit;
        if n > 0 {
            out.push_str(&n.to_string());
            out.push(label);
            secs %= unit;
        }
    }
    out
}

/// Whether `nick` is usable as a nickname: leading letter or special,
/// then letters, digits, specials or `-`.
pub fn is_valid_nick(nick: &str, max_len: usize) -> bool {
    if nick.is_empty() || nick.len() > max_len {
        return false;
    }
    let special = |c: char| "[]\\`_^{|}".contains(c);
    let mut chars = nick.chars();
    let first = chars.next().unwrap();
    if !first.is_ascii_alphabetic() && !special(first) {
        return false;
    }
    chars.all(|c| c.is_ascii_alphanumeric() || special(c) || c == '-')
}

/// Whether `ident` fits the RFC-restricted username charset.
pub fn is_valid_ident(ident: &str, max_len: usize) -> bool {
    if ident.is_empty() || ident.len() > max_len {
        return false;
    }
    ident
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || ".-_".contains(c))
}

/// Whether `name` is a channel name: `#` prefix, bounded length, no
/// separators that would break the wire format.
pub fn is_valid_channel_name(name: &str, max_len: usize) -> bool {
    if name.len() < 2 || name.len() > max_len || !name.starts_with('#') {
        return false;
    }
    !name[1..]
        .chars()
        .any(|c| c == ' ' || c == ',' || c == '\x07' || c == '\r' || c == '\n')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fold_maps_rfc1459_brackets() {
        assert_eq!(irc_fold("Nick[a]\\~"), "nick{a}|^");
        assert!(irc_eq("FOO[]", "foo{}"));
        assert!(!irc_eq("foo", "fooo"));
    }

    #[test]
    fn wildcard_basics() {
        assert!(wildcard_match("*!*@*.example.com", "nick!user@host.example.com"));
        assert!(wildcard_match("n?ck", "Nick"));
        assert!(wildcard_match("*", ""));
        assert!(!wildcard_match("a*b", "acd"));
    }

    #[test]
    fn wildcard_backtracks() {
        assert!(wildcard_match("*aba", "abaaba"));
        assert!(!wildcard_match("*abc*d", "abcc"));
    }

    #[test]
    fn duration_composite_forms() {
        assert_eq!(parse_duration("1y2w3d4h5m6s"), Some(DUR_YEAR + 2 * DUR_WEEK + 3 * DUR_DAY + 4 * DUR_HOUR + 5 * DUR_MIN + 6));
        assert_eq!(parse_duration("300"), Some(300));
        assert_eq!(parse_duration("1h30"), Some(5400));
        assert_eq!(parse_duration("2D"), Some(2 * DUR_DAY));
        assert_eq!(parse_duration(""), None);
        assert_eq!(parse_duration("5x"), None);
        assert_eq!(parse_duration("h"), None);
    }

    #[test]
    fn duration_round_trip() {
        assert_eq!(duration_string(0), "0s");
        assert_eq!(duration_string(90), "1m30s");
        assert_eq!(parse_duration(&duration_string(987_654)), Some(987_654));
    }

    #[test]
    fn nick_validation() {
        assert!(is_valid_nick("Alice", 30));
        assert!(is_valid_nick("[away]`_", 30));
        assert!(!is_valid_nick("1abc", 30));
        assert!(!is_valid_nick("", 30));
        assert!(!is_valid_nick("toolongnick", 5));
    }

    #[test]
    fn channel_name_validation() {
        assert!(is_valid_channel_name("#rust", 64));
        assert!(!is_valid_channel_name("rust", 64));
        assert!(!is_valid_channel_name("#a,b", 64));
        assert!(!is_valid_channel_name("#", 64));
    }
}
