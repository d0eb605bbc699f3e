//! `escalateAfter` values: an attempt count or a duration expression.

use std::time::Duration;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Threshold after which a reaction escalates to a human.
///
/// In YAML this is either a bare number (attempt count) or a string
/// duration `<n>{s|m|h}` (elapsed time since the reaction first fired).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EscalateAfter {
    Count(u32),
    After(Duration),
}

/// Parses `<n>{s|m|h}` into a duration.
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    let (digits, unit) = s.split_at(s.len().saturating_sub(1));
    let n: u64 = digits
        .parse()
        .map_err(|_| format!("invalid duration '{s}'"))?;
    match unit {
        "s" => Ok(Duration::from_secs(n)),
        "m" => Ok(Duration::from_secs(n * 60)),
        "h" => Ok(Duration::from_secs(n * 3600)),
        _ => Err(format!("invalid duration unit in '{s}' (want s, m, or h)")),
    }
}

impl<'de> Deserialize<'de> for EscalateAfter {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Count(u32),
            Text(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Count(n) => Ok(EscalateAfter::Count(n)),
            Raw::Text(s) => parse_duration(&s)
                .map(EscalateAfter::After)
                .map_err(D::Error::custom),
        }
    }
}

impl Serialize for EscalateAfter {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            EscalateAfter::Count(n) => serializer.serialize_u32(*n),
            EscalateAfter::After(d) => serializer.serialize_str(&format!("{}s", d.as_secs())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_units() {
        assert_eq!(parse_duration("45s").unwrap(), Duration::from_secs(45));
        assert_eq!(parse_duration("30m").unwrap(), Duration::from_secs(1800));
        assert_eq!(parse_duration("2h").unwrap(), Duration::from_secs(7200));
    }

    #[test]
    fn rejects_bad_expressions() {
        assert!(parse_duration("").is_err());
        assert!(parse_duration("30").is_err());
        assert!(parse_duration("m30").is_err());
        assert!(parse_duration("30d").is_err());
    }

    #[test]
    fn deserializes_count_and_duration() {
        let count: EscalateAfter = serde_yaml::from_str("5").unwrap();
        assert_eq!(count, EscalateAfter::Count(5));

        let duration: EscalateAfter = serde_yaml::from_str("\"30m\"").unwrap();
        assert_eq!(duration, EscalateAfter::After(Duration::from_secs(1800)));

        let bad: Result<EscalateAfter, _> = serde_yaml::from_str("\"soon\"");
        assert!(bad.is_err());
    }
}
