//! IST display helpers.
//!
//! All stored timestamps are UTC; the platform's customer-facing timezone is
//! Asia/Kolkata. Conversion happens only at display boundaries (logs,
//! rendered pages), never in stored data.

use chrono::{DateTime, Utc};
use chrono_tz::Asia::Kolkata;
use chrono_tz::Tz;

/// Convert a stored UTC timestamp to IST.
pub fn to_ist(ts: DateTime<Utc>) -> DateTime<Tz> {
    ts.with_timezone(&Kolkata)
}

/// Human-readable IST form, e.g. `"2026-08-29 18:45:03 IST"`.
pub fn format_ist(ts: DateTime<Utc>) -> String {
    to_ist(ts).format("%Y-%m-%d %H:%M:%S %Z").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn utc_noon_is_half_past_five_ist() {
        let utc = Utc.with_ymd_and_hms(2026, 1, 15, 12, 0, 0).unwrap();
        let ist = to_ist(utc);
        assert_eq!(ist.format("%H:%M").to_string(), "17:30");
    }

    #[test]
    fn format_includes_zone_abbreviation() {
        let utc = Utc.with_ymd_and_hms(2026, 1, 15, 12, 0, 0).unwrap();
        assert_eq!(format_ist(utc), "2026-01-15 17:30:00 IST");
    }
}
