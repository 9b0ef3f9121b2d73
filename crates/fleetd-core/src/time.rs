//! UTC timestamp helpers.
//!
//! Every timestamp leaving the daemon is ISO-8601 UTC with a literal `Z`
//! suffix, never `+00:00`.

use chrono::{DateTime, Duration, SecondsFormat, Utc};

/// Current time as `2024-05-01T12:00:00.123456Z`.
pub fn utc_iso_timestamp() -> String {
    format_utc(Utc::now())
}

/// Format a UTC instant with microsecond precision and a `Z` suffix.
pub fn format_utc(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Second-precision timestamp `lookback_hours` before now, without zone suffix.
///
/// Matches the `%Y-%m-%dT%H:%M:%S` form used for string comparison against
/// stored reading timestamps. Lookbacks reaching past the representable range
/// clamp to the earliest instant.
#[allow(clippy::cast_possible_truncation)]
pub fn lookback_cutoff(lookback_hours: f64) -> String {
    let seconds = if lookback_hours.is_finite() && lookback_hours > 0.0 {
        (lookback_hours * 3600.0) as i64
    } else {
        0
    };
    Duration::try_seconds(seconds)
        .and_then(|lookback| Utc::now().checked_sub_signed(lookback))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
        .format("%Y-%m-%dT%H:%M:%S")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn timestamps_use_z_suffix() {
        let ts = utc_iso_timestamp();
        assert!(ts.ends_with('Z'), "{ts}");
        assert!(!ts.contains("+00:00"));
    }

    #[test]
    fn format_is_stable() {
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 0).single();
        assert_eq!(
            at.map(format_utc).as_deref(),
            Some("2024-05-01T12:30:00.000000Z")
        );
    }

    #[test]
    fn cutoff_is_in_the_past() {
        let cutoff = lookback_cutoff(4.0);
        let now = Utc::now().format("%Y-%m-%dT%H:%M:%S").to_string();
        assert!(cutoff < now);
        assert_eq!(cutoff.len(), 19);
    }

    #[test]
    fn huge_lookback_clamps_instead_of_panicking() {
        let earliest = DateTime::<Utc>::MIN_UTC.format("%Y-%m-%dT%H:%M:%S").to_string();
        assert_eq!(lookback_cutoff(1e12), earliest);
        assert_eq!(lookback_cutoff(f64::MAX), earliest);
    }
}
