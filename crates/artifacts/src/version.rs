//! Maven-style version ordering.
//!
//! Conflict resolution in the resolver is "highest version wins", so the
//! ordering defined here is load-bearing: it decides which copy of a library
//! ends up injected when two paths through the dependency graph disagree.
//!
//! ## Ordering rules
//!
//! - A version is split into tokens on `.`, `-`, and every transition between
//!   digits and letters (`1.0rc2` → `1`, `0`, `rc`, `2`).
//! - Numeric tokens compare numerically and are greater than any qualifier.
//! - Known qualifiers order `alpha < beta < milestone < rc < snapshot <
//!   (release) < sp`. `a`, `b`, `m`, `cr` are aliases; `ga`, `final` and
//!   `release` all mean "release". Unknown qualifiers sort after every known
//!   qualifier, lexicographically among themselves.
//! - Missing tokens count as `0` / release, so `1.0 == 1.0.0 == 1-ga`.

use std::cmp::Ordering;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// A parsed artifact version.
///
/// Keeps the original text for display and path building; comparison uses the
/// normalised token list.
#[derive(Debug, Clone)]
pub struct Version {
    raw: String,
    tokens: Vec<Token>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum Token {
    Number(u128),
    Qualifier(String),
}

impl Version {
    /// Parses a version string. Returns `None` if `raw` is empty.
    pub fn parse(raw: impl Into<String>) -> Option<Self> {
        let raw = raw.into();
        if raw.trim().is_empty() {
            return None;
        }
        let tokens = normalise(tokenise(&raw));
        Some(Self { raw, tokens })
    }

    /// Returns the version exactly as it was written.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// A key shared by exactly the versions that compare equal: `1.0`,
    /// `1.0.0` and `1-GA` all give `n1`.
    pub fn canonical(&self) -> String {
        self.tokens
            .iter()
            .map(|token| match token {
                Token::Number(n) => format!("n{n}"),
                Token::Qualifier(q) => format!("q{q}"),
            })
            .collect::<Vec<_>>()
            .join(".")
    }

    /// Returns `true` for `-SNAPSHOT` versions.
    pub fn is_snapshot(&self) -> bool {
        self.raw.to_ascii_uppercase().ends_with("SNAPSHOT")
    }
}

fn tokenise(raw: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut current_is_digit = false;

    let flush = |current: &mut String, is_digit: bool, tokens: &mut Vec<Token>| {
        if current.is_empty() {
            return;
        }
        let token = if is_digit {
            match current.parse::<u128>() {
                Ok(n) => Token::Number(n),
                Err(_) => Token::Qualifier(current.clone()),
            }
        } else {
            Token::Qualifier(canonical_qualifier(&current.to_ascii_lowercase()))
        };
        tokens.push(token);
        current.clear();
    };

    for ch in raw.trim().chars() {
        if ch == '.' || ch == '-' || ch == '_' {
            flush(&mut current, current_is_digit, &mut tokens);
            continue;
        }
        let is_digit = ch.is_ascii_digit();
        if !current.is_empty() && is_digit != current_is_digit {
            flush(&mut current, current_is_digit, &mut tokens);
        }
        current_is_digit = is_digit;
        current.push(ch);
    }
    flush(&mut current, current_is_digit, &mut tokens);
    tokens
}

fn canonical_qualifier(q: &str) -> String {
    match q {
        "a" => "alpha".to_string(),
        "b" => "beta".to_string(),
        "m" => "milestone".to_string(),
        "cr" => "rc".to_string(),
        "ga" | "final" | "release" => String::new(),
        other => other.to_string(),
    }
}

/// Drops trailing tokens equivalent to "nothing" so equal versions hash equally.
fn normalise(mut tokens: Vec<Token>) -> Vec<Token> {
    while let Some(last) = tokens.last() {
        if is_null(last) {
            tokens.pop();
        } else {
            break;
        }
    }
    tokens
}

fn is_null(token: &Token) -> bool {
    match token {
        Token::Number(n) => *n == 0,
        Token::Qualifier(q) => q.is_empty(),
    }
}

fn qualifier_rank(q: &str) -> Option<u8> {
    match q {
        "alpha" => Some(0),
        "beta" => Some(1),
        "milestone" => Some(2),
        "rc" => Some(3),
        "snapshot" => Some(4),
        "" => Some(5),
        "sp" => Some(6),
        _ => None,
    }
}

fn compare_qualifiers(a: &str, b: &str) -> Ordering {
    match (qualifier_rank(a), qualifier_rank(b)) {
        (Some(x), Some(y)) => x.cmp(&y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => a.cmp(b),
    }
}

fn compare_tokens(a: Option<&Token>, b: Option<&Token>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (Some(Token::Number(x)), Some(Token::Number(y))) => x.cmp(y),
        (Some(Token::Number(_)), Some(Token::Qualifier(_))) => Ordering::Greater,
        (Some(Token::Qualifier(_)), Some(Token::Number(_))) => Ordering::Less,
        (Some(Token::Qualifier(x)), Some(Token::Qualifier(y))) => compare_qualifiers(x, y),
        (Some(Token::Number(x)), None) => x.cmp(&0),
        (None, Some(Token::Number(y))) => 0.cmp(y),
        (Some(Token::Qualifier(x)), None) => compare_qualifiers(x, ""),
        (None, Some(Token::Qualifier(y))) => compare_qualifiers("", y),
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        let len = self.tokens.len().max(other.tokens.len());
        for i in 0..len {
            let ord = compare_tokens(self.tokens.get(i), other.tokens.get(i));
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Version {}

impl Hash for Version {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.tokens.hash(state);
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.raw)
    }
}

impl Serialize for Version {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.raw)
    }
}

impl<'de> Deserialize<'de> for Version {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Version::parse(raw).ok_or_else(|| serde::de::Error::custom("version must not be empty"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(s: &str) -> Version {
        Version::parse(s).expect("non-empty version")
    }

    #[test]
    fn numeric_components_compare_numerically() {
        assert!(v("1.10") > v("1.9"));
        assert!(v("2.0") > v("1.99.99"));
        assert!(v("1.0.1") > v("1.0"));
    }

    #[test]
    fn trailing_zeros_and_release_aliases_are_equal() {
        assert_eq!(v("1.0"), v("1.0.0"));
        assert_eq!(v("1"), v("1-ga"));
        assert_eq!(v("1.0-final"), v("1"));
    }

    #[test]
    fn qualifiers_sort_before_release() {
        assert!(v("1.0-alpha1") < v("1.0-beta1"));
        assert!(v("1.0-beta2") < v("1.0-rc1"));
        assert!(v("1.0-rc1") < v("1.0-SNAPSHOT"));
        assert!(v("1.0-SNAPSHOT") < v("1.0"));
        assert!(v("1.0") < v("1.0-sp1"));
    }

    #[test]
    fn qualifier_aliases_match_long_forms() {
        assert_eq!(v("1.0-a1"), v("1.0-alpha1"));
        assert_eq!(v("1.0-cr2"), v("1.0-rc2"));
    }

    #[test]
    fn unknown_qualifiers_sort_after_known_ones() {
        assert!(v("33.0.0-jre") > v("33.0.0"));
        assert!(v("1.0-android") < v("1.0-jre"));
    }

    #[test]
    fn letter_digit_transitions_split_tokens() {
        assert!(v("1.0rc2") > v("1.0rc1"));
        assert_eq!(v("1.0rc1"), v("1.0-rc-1"));
    }

    #[test]
    fn next_patch_beats_prerelease_of_same_minor() {
        assert!(v("1.0.1") > v("1.0-rc1"));
    }

    #[test]
    fn equal_versions_hash_identically() {
        use std::collections::HashSet;
        let mut set = HashSet::new();
        set.insert(v("1.0"));
        assert!(set.contains(&v("1.0.0")));
    }

    #[test]
    fn canonical_form_follows_equality() {
        assert_eq!(v("1.0").canonical(), v("1.0.0").canonical());
        assert_eq!(v("1-GA").canonical(), "n1");
        assert_eq!(v("1.0-cr1").canonical(), v("1.0-RC-1").canonical());
        assert_ne!(v("1.0-rc1").canonical(), v("1.0").canonical());
        assert_ne!(v("1.0-jre").canonical(), v("1.0-android").canonical());
    }

    #[test]
    fn display_preserves_original_text() {
        assert_eq!(v("1.0.0-RC1").to_string(), "1.0.0-RC1");
        assert!(v("2.1-SNAPSHOT").is_snapshot());
    }

    #[test]
    fn empty_version_is_rejected() {
        assert!(Version::parse("").is_none());
        assert!(Version::parse("   ").is_none());
    }
}
