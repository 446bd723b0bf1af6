use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::de;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

// ---------------------------------------------------------------------------
// HumanDuration
// ---------------------------------------------------------------------------

/// A duration parsed from a human-readable string like `"30s"`, `"5m"`, `"1h"`, `"2d"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HumanDuration(Duration);

impl HumanDuration {
    pub fn as_duration(&self) -> Duration {
        self.0
    }

    pub const fn zero() -> Self {
        Self(Duration::ZERO)
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }
}

impl From<HumanDuration> for Duration {
    fn from(hd: HumanDuration) -> Self {
        hd.0
    }
}

impl From<Duration> for HumanDuration {
    fn from(d: Duration) -> Self {
        Self(d)
    }
}

impl FromStr for HumanDuration {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        let s = s.trim();
        if s.is_empty() {
            anyhow::bail!("empty duration string");
        }

        let (num_part, suffix) = split_number_suffix(s)?;
        let value: u64 = num_part
            .parse()
            .map_err(|_| anyhow::anyhow!("invalid number in duration: {s:?}"))?;

        let secs = match suffix {
            "s" => value,
            "m" => value * 60,
            "h" => value * 3600,
            "d" => value * 86400,
            _ => {
                anyhow::bail!("unsupported duration suffix {suffix:?} in {s:?} (expected s/m/h/d)")
            }
        };

        Ok(Self(Duration::from_secs(secs)))
    }
}

impl fmt::Display for HumanDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let secs = self.0.as_secs();
        if secs == 0 {
            return write!(f, "0s");
        }
        if secs % 86400 == 0 {
            write!(f, "{}d", secs / 86400)
        } else if secs % 3600 == 0 {
            write!(f, "{}h", secs / 3600)
        } else if secs % 60 == 0 {
            write!(f, "{}m", secs / 60)
        } else {
            write!(f, "{secs}s")
        }
    }
}

impl Serialize for HumanDuration {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for HumanDuration {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}

// ---------------------------------------------------------------------------
// helpers
// ---------------------------------------------------------------------------

/// Split a string like `"30s"` into `("30", "s")`.
fn split_number_suffix(s: &str) -> anyhow::Result<(&str, &str)> {
    let idx = s
        .find(|c: char| !c.is_ascii_digit())
        .ok_or_else(|| anyhow::anyhow!("missing suffix in {s:?}"))?;
    if idx == 0 {
        anyhow::bail!("missing numeric part in {s:?}");
    }
    Ok((&s[..idx], &s[idx..]))
}

/// Parse a `--silence unit=n` operator command argument, e.g. `"hours=2"`.
/// `unit` is one of `seconds`, `minutes`, `hours`, `days`, `weeks`.
pub fn parse_silence_spec(spec: &str) -> anyhow::Result<Duration> {
    let (unit, num) = spec
        .split_once('=')
        .ok_or_else(|| anyhow::anyhow!("invalid --silence format, expected unit=n, got {spec:?}"))?;
    let num: u64 = num
        .parse()
        .map_err(|_| anyhow::anyhow!("invalid --silence count {num:?}"))?;
    let secs = match unit {
        "seconds" => num,
        "minutes" => num * 60,
        "hours" => num * 3600,
        "days" => num * 86400,
        "weeks" => num * 86400 * 7,
        other => anyhow::bail!("unsupported --silence unit {other:?} (expected seconds/minutes/hours/days/weeks)"),
    };
    Ok(Duration::from_secs(secs))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duration_seconds() {
        let d: HumanDuration = "30s".parse().unwrap();
        assert_eq!(d.as_duration(), Duration::from_secs(30));
        assert_eq!(d.to_string(), "30s");
    }

    #[test]
    fn duration_minutes() {
        let d: HumanDuration = "5m".parse().unwrap();
        assert_eq!(d.as_duration(), Duration::from_secs(300));
    }

    #[test]
    fn duration_hours_normalizes_to_days() {
        let d: HumanDuration = "48h".parse().unwrap();
        assert_eq!(d.to_string(), "2d");
    }

    #[test]
    fn duration_rejects_missing_suffix() {
        assert!("30".parse::<HumanDuration>().is_err());
    }

    #[test]
    fn duration_rejects_bad_suffix() {
        assert!("30x".parse::<HumanDuration>().is_err());
    }

    #[test]
    fn duration_rejects_empty() {
        assert!("".parse::<HumanDuration>().is_err());
    }

    #[test]
    fn silence_spec_hours() {
        let d = parse_silence_spec("hours=2").unwrap();
        assert_eq!(d, Duration::from_secs(2 * 3600));
    }

    #[test]
    fn silence_spec_minutes() {
        let d = parse_silence_spec("minutes=30").unwrap();
        assert_eq!(d, Duration::from_secs(30 * 60));
    }

    #[test]
    fn silence_spec_rejects_bad_unit() {
        assert!(parse_silence_spec("fortnights=1").is_err());
    }

    #[test]
    fn silence_spec_rejects_malformed() {
        assert!(parse_silence_spec("hours-2").is_err());
        assert!(parse_silence_spec("hours=two").is_err());
    }

    #[test]
    fn serde_roundtrip_duration() {
        let d: HumanDuration = "30s".parse().unwrap();
        let json = serde_json::to_string(&d).unwrap();
        let d2: HumanDuration = serde_json::from_str(&json).unwrap();
        assert_eq!(d, d2);
    }
}
