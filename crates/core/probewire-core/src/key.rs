//! Probe keys and routing patterns.
//!
//! A probe key is `<provider>.<module>.<probe>`; each segment is either a
//! literal name or the `*` wildcard. Sample routing keys append one more
//! segment, the consumer id or `all`.

use crate::{ProbeWireError, ProbeWireResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Segment separator
pub const SEPARATOR: char = '.';
/// Single segment wildcard
pub const WILDCARD: &str = "*";
/// Routing suffix for samples broadcast to every consumer
pub const ALL_CONSUMERS: &str = "all";

const RESERVED: [char; 3] = ['.', '#', '*'];

/// Reject empty names and names containing `.`, `#` or `*`
pub fn validate_name(kind: &str, name: &str) -> ProbeWireResult<()> {
    if name.is_empty() {
        return Err(ProbeWireError::config(format!("Argument is missing: '{kind}'")));
    }
    if name.contains(RESERVED) {
        return Err(ProbeWireError::config(format!(
            "Invalid character in {kind} '{name}'. The following are reserved: .#*"
        )));
    }
    Ok(())
}

/// One probe key segment
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Segment {
    /// `*`
    Any,
    /// A literal name
    Literal(String),
}

impl Segment {
    /// Whether `name` is selected by this segment
    #[must_use] pub fn matches(&self, name: &str) -> bool {
        match self {
            Segment::Any => true,
            Segment::Literal(literal) => literal == name,
        }
    }

    /// The literal name, if any
    #[must_use] pub fn as_literal(&self) -> Option<&str> {
        match self {
            Segment::Any => None,
            Segment::Literal(literal) => Some(literal),
        }
    }

    fn parse(kind: &str, raw: &str) -> ProbeWireResult<Self> {
        if raw == WILDCARD {
            return Ok(Segment::Any);
        }
        validate_name(kind, raw)?;
        Ok(Segment::Literal(raw.to_string()))
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Segment::Any => f.write_str(WILDCARD),
            Segment::Literal(literal) => f.write_str(literal),
        }
    }
}

/// `<provider>.<module>.<probe>` with optional wildcards
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProbeKey {
    /// Provider segment
    pub provider: Segment,
    /// Module segment
    pub module: Segment,
    /// Probe segment
    pub probe: Segment,
}

impl ProbeKey {
    /// Fully literal key
    pub fn literal(provider: &str, module: &str, probe: &str) -> ProbeWireResult<Self> {
        Ok(Self {
            provider: Segment::parse("provider", provider)?,
            module: Segment::parse("module", module)?,
            probe: Segment::parse("probe", probe)?,
        })
    }

    /// Parse a key that must already have exactly three segments
    pub fn parse(raw: &str) -> ProbeWireResult<Self> {
        let parts: Vec<&str> = raw.split(SEPARATOR).collect();
        let [provider, module, probe] = parts.as_slice() else {
            return Err(ProbeWireError::config(format!(
                "Probe key '{raw}' must have the form provider.module.probe"
            )));
        };
        Ok(Self {
            provider: Segment::parse("provider", provider)?,
            module: Segment::parse("module", module)?,
            probe: Segment::parse("probe", probe)?,
        })
    }

    /// Fill elided segments of a subscription pattern with wildcards and parse.
    ///
    /// A leading `.` becomes `*.`, a trailing `.` becomes `.*` and the first
    /// inner `..` becomes `.*.`, so `..cpu`, `p..cpu` and `p.m.` all name
    /// three segments. `.cpu` still names two and is rejected.
    pub fn normalize(raw: &str) -> ProbeWireResult<Self> {
        let mut key = raw.trim().to_string();
        if key.starts_with(SEPARATOR) {
            key.insert(0, '*');
        }
        if key.ends_with(SEPARATOR) {
            key.push('*');
        }
        let key = key.replacen("..", ".*.", 1);
        Self::parse(&key)
    }

    /// Whether a concrete probe is selected by this key
    #[must_use] pub fn matches(&self, provider: &str, module: &str, probe: &str) -> bool {
        self.provider.matches(provider) && self.module.matches(module) && self.probe.matches(probe)
    }

    /// Sample routing pattern for this key and a consumer suffix
    #[must_use] pub fn routing_pattern(&self, suffix: &str) -> String {
        format!("{self}{SEPARATOR}{suffix}")
    }
}

impl fmt::Display for ProbeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{SEPARATOR}{}{SEPARATOR}{}", self.provider, self.module, self.probe)
    }
}

impl FromStr for ProbeKey {
    type Err = ProbeWireError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Routing key for one emitted sample
#[must_use] pub fn routing_key(provider: &str, module: &str, probe: &str, target: &str) -> String {
    format!("{provider}{SEPARATOR}{module}{SEPARATOR}{probe}{SEPARATOR}{target}")
}

/// Topic matching: `*` matches exactly one segment, `#` zero or more.
#[must_use] pub fn topic_matches(pattern: &str, key: &str) -> bool {
    let pattern: Vec<&str> = pattern.split(SEPARATOR).collect();
    let key: Vec<&str> = key.split(SEPARATOR).collect();
    match_segments(&pattern, &key)
}

fn match_segments(pattern: &[&str], key: &[&str]) -> bool {
    match pattern.split_first() {
        None => key.is_empty(),
        Some((&"#", rest)) => (0..=key.len()).any(|skip| match_segments(rest, &key[skip..])),
        Some((head, rest)) => match key.split_first() {
            Some((segment, key_rest)) => {
                (*head == WILDCARD || head == segment) && match_segments(rest, key_rest)
            }
            None => false,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_display() {
        let key = ProbeKey::parse("web.api.requests").unwrap();
        assert_eq!(key.provider, Segment::Literal("web".into()));
        assert_eq!(key.to_string(), "web.api.requests");

        let key: ProbeKey = "*.*.uptime".parse().unwrap();
        assert_eq!(key.provider, Segment::Any);
        assert!(key.matches("a", "b", "uptime"));
        assert!(!key.matches("a", "b", "load"));
    }

    #[test]
    fn test_parse_rejects_bad_shapes() {
        assert!(ProbeKey::parse("a.b").is_err());
        assert!(ProbeKey::parse("a.b.c.d").is_err());
        assert!(ProbeKey::parse("a.#.c").is_err());
        assert!(ProbeKey::parse("a..c").is_err());
    }

    #[test]
    fn test_normalize_fills_wildcards() {
        assert_eq!(ProbeKey::normalize(".m.p").unwrap().to_string(), "*.m.p");
        assert_eq!(ProbeKey::normalize("p.m.").unwrap().to_string(), "p.m.*");
        assert_eq!(ProbeKey::normalize("p..x").unwrap().to_string(), "p.*.x");
        assert_eq!(ProbeKey::normalize("..x").unwrap().to_string(), "*.*.x");
        assert!(ProbeKey::normalize("x").is_err());
    }

    #[test]
    fn test_normalize_keeps_segment_count() {
        assert!(ProbeKey::normalize(".cpu").is_err());
        assert!(ProbeKey::normalize("cpu.").is_err());
        assert!(ProbeKey::normalize("...cpu").is_err());
        assert_eq!(ProbeKey::normalize(" ..cpu ").unwrap().to_string(), "*.*.cpu");
    }

    #[test]
    fn test_validate_name() {
        assert!(validate_name("probe", "requests_total").is_ok());
        assert!(validate_name("probe", "").is_err());
        assert!(validate_name("probe", "a.b").is_err());
        assert!(validate_name("probe", "a*").is_err());
        assert!(validate_name("probe", "#a").is_err());
    }

    #[test]
    fn test_topic_matching() {
        assert!(topic_matches("*.*.cpu.c1", "p.m.cpu.c1"));
        assert!(topic_matches("*.*.cpu.all", "p.m.cpu.all"));
        assert!(!topic_matches("*.*.cpu.c1", "p.m.cpu.c2"));
        assert!(!topic_matches("*.*.cpu", "p.m.cpu.c1"));
        assert!(topic_matches("p.#", "p.m.cpu.c1"));
        assert!(topic_matches("#.c1", "p.m.cpu.c1"));
        assert!(topic_matches("#", "p"));
    }
}
