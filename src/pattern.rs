//! Glob-style pattern matching for the exception lists.
//!
//! Supports `*`, `?` and `[...]` character classes (including ranges and
//! `!` negation), matching the whole name. An unterminated `[` is treated
//! as a literal bracket, like fnmatch does.

/// Match a single glob pattern against a package name.
pub fn matches(pattern: &str, name: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let n: Vec<char> = name.chars().collect();
    match_at(&p, &n)
}

/// Match a name against a list of patterns.
pub fn matches_any<S: AsRef<str>>(patterns: &[S], name: &str) -> bool {
    patterns.iter().any(|p| matches(p.as_ref(), name))
}

fn match_at(p: &[char], n: &[char]) -> bool {
    let Some(&head) = p.first() else {
        return n.is_empty();
    };
    match head {
        '*' => {
            // Try every possible length for the star, shortest first.
            (0..=n.len()).any(|i| match_at(&p[1..], &n[i..]))
        }
        '?' => !n.is_empty() && match_at(&p[1..], &n[1..]),
        '[' => match parse_class(p) {
            Some((class, rest)) => {
                !n.is_empty() && class.contains(n[0]) && match_at(rest, &n[1..])
            }
            // No closing bracket: literal '['.
            None => !n.is_empty() && n[0] == '[' && match_at(&p[1..], &n[1..]),
        },
        c => !n.is_empty() && n[0] == c && match_at(&p[1..], &n[1..]),
    }
}

struct CharClass {
    negated: bool,
    singles: Vec<char>,
    ranges: Vec<(char, char)>,
}

impl CharClass {
    fn contains(&self, c: char) -> bool {
        let hit = self.singles.contains(&c)
            || self.ranges.iter().any(|&(lo, hi)| c >= lo && c <= hi);
        hit != self.negated
    }
}

/// Parse a `[...]` class starting at `p[0] == '['`. Returns the class and
/// the remaining pattern after the closing bracket, or None when the class
/// is unterminated.
fn parse_class(p: &[char]) -> Option<(CharClass, &[char])> {
    let mut i = 1;
    let negated = matches!(p.get(i), Some('!') | Some('^'));
    if negated {
        i += 1;
    }

    let mut singles = Vec::new();
    let mut ranges = Vec::new();
    let mut first = true;
    while let Some(&c) = p.get(i) {
        if c == ']' && !first {
            let class = CharClass {
                negated,
                singles,
                ranges,
            };
            return Some((class, &p[i + 1..]));
        }
        first = false;
        if let (Some('-'), Some(&hi)) = (p.get(i + 1).copied(), p.get(i + 2)) {
            if hi != ']' {
                ranges.push((c, hi));
                i += 3;
                continue;
            }
        }
        singles.push(c);
        i += 1;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_literal() {
        assert!(matches("busybox", "busybox"));
        assert!(!matches("busybox", "busybox-static"));
        assert!(!matches("busybox-static", "busybox"));
    }

    #[test]
    fn test_star() {
        assert!(matches("linux-*", "linux-postmarketos"));
        assert!(matches("linux-*", "linux-"));
        assert!(!matches("linux-*", "linux"));
        assert!(matches("*", ""));
        assert!(matches("*-dev", "musl-dev"));
        assert!(matches("a*b*c", "aXXbYYc"));
        assert!(!matches("a*b*c", "aXXcYYb"));
    }

    #[test]
    fn test_question_mark() {
        assert!(matches("gcc?", "gcc6"));
        assert!(!matches("gcc?", "gcc"));
        assert!(!matches("gcc?", "gcc66"));
    }

    #[test]
    fn test_char_class() {
        assert!(matches("gcc[0-9]", "gcc6"));
        assert!(!matches("gcc[0-9]", "gccx"));
        assert!(matches("[abc]*", "banana"));
        assert!(matches("[!0-9]*", "xyz"));
        assert!(!matches("[!0-9]*", "9lives"));
    }

    #[test]
    fn test_unterminated_class_is_literal() {
        assert!(matches("foo[bar", "foo[bar"));
        assert!(!matches("foo[bar", "foobar"));
    }

    #[test]
    fn test_matches_any() {
        let patterns = vec!["linux-*".to_string(), "device-*".to_string()];
        assert!(matches_any(&patterns, "linux-sony-amami"));
        assert!(matches_any(&patterns, "device-qemu-amd64"));
        assert!(!matches_any(&patterns, "hello-world"));
        let empty: Vec<String> = Vec::new();
        assert!(!matches_any(&empty, "anything"));
    }
}
