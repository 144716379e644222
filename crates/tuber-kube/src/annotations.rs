//! Per-resource release policy read from manifest annotations
//!
//! ```yaml
//! metadata:
//!   annotations:
//!     tuber/rolloutTimeout: 10m
//!     tuber/rollbackTimeout: 2m
//!     tuber/watchUrl: https://sentry.io/api/0/projects/org/app/issues/?query=is:unresolved
//!     tuber/watchDuration: PT15M
//! ```
//!
//! Values that are not strings are ignored, empty strings mean "unset".

use std::time::Duration;

use serde_yaml::Mapping;

use crate::error::{KubeError, Result};

/// Tuber annotation keys
pub mod tuber {
    /// How long to wait for the rollout to finish
    pub const ROLLOUT_TIMEOUT: &str = "tuber/rolloutTimeout";
    /// How long to wait for a rolled-back workload
    pub const ROLLBACK_TIMEOUT: &str = "tuber/rollbackTimeout";
    /// External monitor polled after the rollout
    pub const WATCH_URL: &str = "tuber/watchUrl";
    /// How long the external monitor is polled
    pub const WATCH_DURATION: &str = "tuber/watchDuration";
}

/// Release policy for a single resource
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourcePolicy {
    pub rollout_timeout: Option<Duration>,
    pub rollback_timeout: Option<Duration>,
    pub monitor_url: Option<String>,
    pub monitor_window: Option<Duration>,
}

impl ResourcePolicy {
    /// Read the policy from a resource's `metadata.annotations`
    pub fn from_annotations(annotations: Option<&Mapping>) -> Result<Self> {
        let Some(annotations) = annotations else {
            return Ok(Self::default());
        };

        Ok(Self {
            rollout_timeout: duration_annotation(annotations, tuber::ROLLOUT_TIMEOUT)?,
            rollback_timeout: duration_annotation(annotations, tuber::ROLLBACK_TIMEOUT)?,
            monitor_url: string_annotation(annotations, tuber::WATCH_URL).map(str::to_string),
            monitor_window: duration_annotation(annotations, tuber::WATCH_DURATION)?,
        })
    }
}

/// A non-empty string annotation
pub fn string_annotation<'a>(annotations: &'a Mapping, key: &str) -> Option<&'a str> {
    annotations
        .get(key)
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

/// A duration annotation; present-but-malformed is an error
pub fn duration_annotation(annotations: &Mapping, key: &str) -> Result<Option<Duration>> {
    match string_annotation(annotations, key) {
        None => Ok(None),
        Some(value) => parse_duration(value)
            .map(Some)
            .map_err(|message| KubeError::InvalidAnnotation {
                key: key.to_string(),
                value: value.to_string(),
                message,
            }),
    }
}

/// Parse a duration such as `90s`, `1h30m`, `1.5h`, `500ms` or ISO-8601 `PT5M`
///
/// A bare number is taken as seconds.
pub fn parse_duration(value: &str) -> std::result::Result<Duration, String> {
    let value = value.trim();
    if value.is_empty() {
        return Err("empty duration".to_string());
    }
    if value.starts_with('P') || value.starts_with('p') {
        return parse_iso8601(value);
    }
    if let Ok(secs) = value.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }
    parse_compound(value)
}

fn unit_nanos(unit: &str) -> Option<f64> {
    Some(match unit {
        "ns" => 1.0,
        "us" | "µs" => 1e3,
        "ms" => 1e6,
        "s" => 1e9,
        "m" => 60e9,
        "h" => 3600e9,
        _ => return None,
    })
}

/// `<number><unit>` pairs, e.g. `1h30m` or `2.5s`
fn parse_compound(value: &str) -> std::result::Result<Duration, String> {
    let mut total = 0.0_f64;
    let mut rest = value;

    while !rest.is_empty() {
        let num_end = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .ok_or_else(|| format!("missing unit in duration '{}'", value))?;
        if num_end == 0 {
            return Err(format!("expected a number in duration '{}'", value));
        }
        let number: f64 = rest[..num_end]
            .parse()
            .map_err(|_| format!("invalid number in duration '{}'", value))?;

        let after = &rest[num_end..];
        let unit_end = after
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(after.len());
        let unit = &after[..unit_end];
        let nanos = unit_nanos(unit)
            .ok_or_else(|| format!("unknown unit '{}' in duration '{}'", unit, value))?;

        total += number * nanos;
        rest = &after[unit_end..];
    }

    let nanos = total.round();
    if !nanos.is_finite() || nanos >= u64::MAX as f64 {
        return Err(format!("duration '{}' is out of range", value));
    }
    Ok(Duration::from_nanos(nanos as u64))
}

/// `PnDTnHnMnS`, any component optional
fn parse_iso8601(value: &str) -> std::result::Result<Duration, String> {
    let upper = value.to_ascii_uppercase();
    let body = &upper[1..];
    let (date, time) = match body.split_once('T') {
        Some((d, t)) => (d, Some(t)),
        None => (body, None),
    };
    if date.is_empty() && time.is_none_or(str::is_empty) {
        return Err(format!("empty ISO-8601 duration '{}'", value));
    }

    let mut secs = 0.0_f64;
    secs += iso_components(date, &[('W', 604_800.0), ('D', 86_400.0)], value)?;
    if let Some(time) = time {
        if time.is_empty() {
            return Err(format!("missing time components in '{}'", value));
        }
        secs += iso_components(time, &[('H', 3600.0), ('M', 60.0), ('S', 1.0)], value)?;
    }

    Duration::try_from_secs_f64(secs)
        .map_err(|_| format!("ISO-8601 duration '{}' is out of range", value))
}

fn iso_components(
    part: &str,
    units: &[(char, f64)],
    original: &str,
) -> std::result::Result<f64, String> {
    let mut total = 0.0;
    let mut number = String::new();
    for c in part.chars() {
        if c.is_ascii_digit() || c == '.' || c == ',' {
            number.push(if c == ',' { '.' } else { c });
            continue;
        }
        let factor = units
            .iter()
            .find(|(u, _)| *u == c)
            .map(|(_, f)| *f)
            .ok_or_else(|| format!("unexpected '{}' in ISO-8601 duration '{}'", c, original))?;
        let n: f64 = number
            .parse()
            .map_err(|_| format!("invalid number in ISO-8601 duration '{}'", original))?;
        total += n * factor;
        number.clear();
    }
    if !number.is_empty() {
        return Err(format!("missing designator in ISO-8601 duration '{}'", original));
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_annotations(pairs: &[(&str, serde_yaml::Value)]) -> Mapping {
        pairs
            .iter()
            .map(|(k, v)| (serde_yaml::Value::from(*k), v.clone()))
            .collect()
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("5m"), Ok(Duration::from_secs(300)));
        assert_eq!(parse_duration("30s"), Ok(Duration::from_secs(30)));
        assert_eq!(parse_duration("1h"), Ok(Duration::from_secs(3600)));
        assert_eq!(parse_duration("100ms"), Ok(Duration::from_millis(100)));
        assert_eq!(parse_duration("60"), Ok(Duration::from_secs(60)));
        assert_eq!(parse_duration("1h30m"), Ok(Duration::from_secs(5400)));
        assert_eq!(parse_duration("1.5h"), Ok(Duration::from_secs(5400)));
        assert!(parse_duration("").is_err());
        assert!(parse_duration("5x").is_err());
        assert!(parse_duration("m5").is_err());
        assert!(parse_duration("soon").is_err());
    }

    #[test]
    fn test_parse_iso8601() {
        assert_eq!(parse_duration("PT5M"), Ok(Duration::from_secs(300)));
        assert_eq!(parse_duration("PT1H30S"), Ok(Duration::from_secs(3630)));
        assert_eq!(parse_duration("P1D"), Ok(Duration::from_secs(86_400)));
        assert_eq!(parse_duration("PT0.5S"), Ok(Duration::from_millis(500)));
        assert!(parse_duration("PT").is_err());
        assert!(parse_duration("P").is_err());
        assert!(parse_duration("PT5").is_err());
        assert!(parse_duration("PT5X").is_err());
    }

    #[test]
    fn test_out_of_range_duration_is_error() {
        assert!(parse_duration("P99999999999999999999D").is_err());
        assert!(parse_duration("PT99999999999999999999H").is_err());
        assert!(parse_duration("9999999999999h").is_err());
        assert!(parse_duration("99999999999999999999s").is_err());
        assert_eq!(parse_duration("87600h"), Ok(Duration::from_secs(87_600 * 3600)));

        let annotations = make_annotations(&[(
            tuber::ROLLOUT_TIMEOUT,
            serde_yaml::Value::from("P99999999999999999999D"),
        )]);
        assert!(matches!(
            ResourcePolicy::from_annotations(Some(&annotations)),
            Err(KubeError::InvalidAnnotation { .. })
        ));
    }

    #[test]
    fn test_policy_from_annotations() {
        let annotations = make_annotations(&[
            (tuber::ROLLOUT_TIMEOUT, "10m".into()),
            (tuber::WATCH_URL, "https://monitor.example.com/issues".into()),
            (tuber::WATCH_DURATION, "PT15M".into()),
        ]);
        let policy = ResourcePolicy::from_annotations(Some(&annotations)).unwrap();
        assert_eq!(policy.rollout_timeout, Some(Duration::from_secs(600)));
        assert_eq!(policy.rollback_timeout, None);
        assert_eq!(
            policy.monitor_url.as_deref(),
            Some("https://monitor.example.com/issues")
        );
        assert_eq!(policy.monitor_window, Some(Duration::from_secs(900)));
    }

    #[test]
    fn test_non_string_and_empty_values_ignored() {
        let annotations = make_annotations(&[
            (tuber::ROLLOUT_TIMEOUT, serde_yaml::Value::from(30)),
            (tuber::ROLLBACK_TIMEOUT, "".into()),
        ]);
        let policy = ResourcePolicy::from_annotations(Some(&annotations)).unwrap();
        assert_eq!(policy, ResourcePolicy::default());
        assert_eq!(
            ResourcePolicy::from_annotations(None).unwrap(),
            ResourcePolicy::default()
        );
    }

    #[test]
    fn test_malformed_duration_is_error() {
        let annotations = make_annotations(&[(tuber::ROLLBACK_TIMEOUT, "forever".into())]);
        let err = ResourcePolicy::from_annotations(Some(&annotations)).unwrap_err();
        assert!(matches!(
            err,
            KubeError::InvalidAnnotation { ref key, .. } if key == tuber::ROLLBACK_TIMEOUT
        ));
    }
}
