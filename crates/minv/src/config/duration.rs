//! ISO 8601 durations (`P1D`, `PT5M`, `-P1DT2H`) as used by the collection
//! harvest and export intervals.

use std::sync::OnceLock;

use chrono::TimeDelta;
use regex::Regex;

use crate::error::ConfigError;

fn duration_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"^(?P<sign>[+-])?P(?:(?P<years>\d+(?:\.\d+)?)Y)?(?:(?P<months>\d+(?:\.\d+)?)M)?(?:(?P<days>\d+(?:\.\d+)?)D)?(?:T(?:(?P<hours>\d+(?:\.\d+)?)H)?(?:(?P<minutes>\d+(?:\.\d+)?)M)?(?:(?P<seconds>\d+(?:\.\d+)?)S)?)?$",
        )
        .expect("duration pattern is valid")
    })
}

/// Parses an ISO 8601 duration. Months count as 30 days and years as 365.
pub fn parse_duration(value: &str) -> Result<TimeDelta, ConfigError> {
    let value = value.trim();
    let caps = duration_regex()
        .captures(value)
        .ok_or_else(|| ConfigError::InvalidDuration(value.to_string()))?;

    // "P" and "PT" alone carry no components.
    if value.trim_start_matches(['+', '-']).trim_end_matches('T') == "P" {
        return Err(ConfigError::InvalidDuration(value.to_string()));
    }

    let component = |name: &str| -> Result<f64, ConfigError> {
        caps.name(name)
            .map(|m| m.as_str().parse::<f64>())
            .transpose()
            .map(|v| v.unwrap_or(0.0))
            .map_err(|_| ConfigError::InvalidDuration(value.to_string()))
    };

    let days = component("days")? + component("months")? * 30.0 + component("years")? * 365.0;
    let seconds = days * 86_400.0
        + component("hours")? * 3_600.0
        + component("minutes")? * 60.0
        + component("seconds")?;

    let millis = (seconds * 1_000.0).round() as i64;
    let sign = if caps.name("sign").map(|m| m.as_str()) == Some("-") {
        -1
    } else {
        1
    };

    TimeDelta::try_milliseconds(sign * millis)
        .ok_or_else(|| ConfigError::InvalidDuration(value.to_string()))
}

/// Formats a duration back into ISO 8601 with day/hour/minute/second parts.
pub fn format_duration(delta: TimeDelta) -> String {
    let total = delta.num_seconds();
    let mut out = String::new();
    if total < 0 {
        out.push('-');
    }
    out.push('P');

    let mut seconds = total.unsigned_abs();
    let days = seconds / 86_400;
    seconds %= 86_400;
    let hours = seconds / 3_600;
    seconds %= 3_600;
    let minutes = seconds / 60;
    seconds %= 60;

    if days > 0 {
        out.push_str(&format!("{}D", days));
    }
    if hours > 0 || minutes > 0 || seconds > 0 {
        out.push('T');
        if hours > 0 {
            out.push_str(&format!("{}H", hours));
        }
        if minutes > 0 {
            out.push_str(&format!("{}M", minutes));
        }
        if seconds > 0 {
            out.push_str(&format!("{}S", seconds));
        }
    }
    if days == 0 && hours == 0 && minutes == 0 && seconds == 0 {
        out.push_str("T0S");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_durations() {
        assert_eq!(parse_duration("P1D").unwrap(), TimeDelta::days(1));
        assert_eq!(parse_duration("PT5M").unwrap(), TimeDelta::minutes(5));
        assert_eq!(parse_duration("PT1H30M").unwrap(), TimeDelta::minutes(90));
        assert_eq!(parse_duration("PT0.5S").unwrap(), TimeDelta::milliseconds(500));
    }

    #[test]
    fn test_parse_months_and_years() {
        assert_eq!(parse_duration("P1M").unwrap(), TimeDelta::days(30));
        assert_eq!(parse_duration("P1Y").unwrap(), TimeDelta::days(365));
        // Minutes after T, months before it.
        assert_eq!(
            parse_duration("P1MT1M").unwrap(),
            TimeDelta::days(30) + TimeDelta::minutes(1)
        );
    }

    #[test]
    fn test_parse_negative() {
        assert_eq!(parse_duration("-P1D").unwrap(), TimeDelta::days(-1));
    }

    #[test]
    fn test_parse_invalid() {
        assert!(parse_duration("").is_err());
        assert!(parse_duration("P").is_err());
        assert!(parse_duration("PT").is_err());
        assert!(parse_duration("1D").is_err());
        assert!(parse_duration("every day").is_err());
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(TimeDelta::days(1)), "P1D");
        assert_eq!(format_duration(TimeDelta::minutes(5)), "PT5M");
        assert_eq!(
            format_duration(TimeDelta::days(2) + TimeDelta::seconds(3_661)),
            "P2DT1H1M1S"
        );
        assert_eq!(format_duration(TimeDelta::zero()), "PT0S");
        assert_eq!(format_duration(TimeDelta::hours(-3)), "-PT3H");
    }

    #[test]
    fn test_format_then_parse_is_stable() {
        let delta = TimeDelta::days(3) + TimeDelta::minutes(7);
        assert_eq!(parse_duration(&format_duration(delta)).unwrap(), delta);
    }
}
