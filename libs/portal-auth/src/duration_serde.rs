//! Serde support for human-readable durations (`"30s"`, `"5m"`, `"250ms"`).
//!
//! ```
//! use serde::Deserialize;
//! use std::time::Duration;
//!
//! #[derive(Deserialize)]
//! struct Timeouts {
//!     #[serde(with = "portal_auth::duration_serde")]
//!     acquire: Duration,
//! }
//!
//! let t: Timeouts = serde_json::from_str(r#"{"acquire":"10s"}"#).unwrap();
//! assert_eq!(t.acquire, Duration::from_secs(10));
//! ```

use std::time::Duration;

use serde::{Deserialize, Deserializer, Serializer, de};

/// Deserializes a `Duration` from a humantime string.
///
/// # Errors
///
/// Fails when the input is not a string or is not a valid humantime duration.
pub fn deserialize<'de, D>(d: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(d)?;
    humantime::parse_duration(&raw)
        .map_err(|e| de::Error::custom(format!("invalid duration '{raw}': {e}")))
}

/// Serializes a `Duration` as a humantime string.
///
/// # Errors
///
/// Propagates serializer errors.
pub fn serialize<S>(d: &Duration, s: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    s.collect_str(&humantime::format_duration(*d))
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use serde::Serialize;

    #[derive(Serialize, Deserialize)]
    struct Holder {
        #[serde(with = "super")]
        value: Duration,
    }

    #[test]
    fn parses_compound_durations() {
        let h: Holder = serde_json::from_str(r#"{"value":"1m 30s"}"#).unwrap();
        assert_eq!(h.value, Duration::from_secs(90));
    }

    #[test]
    fn rejects_bare_numbers_in_strings() {
        let err = serde_json::from_str::<Holder>(r#"{"value":"abc"}"#)
            .err()
            .unwrap();
        assert!(err.to_string().contains("invalid duration"), "{err}");
    }

    #[test]
    fn serializes_back_to_humantime() {
        let h = Holder {
            value: Duration::from_millis(250),
        };
        assert_eq!(serde_json::to_string(&h).unwrap(), r#"{"value":"250ms"}"#);
    }
}
