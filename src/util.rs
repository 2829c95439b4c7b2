
mod crypto;

pub use self::crypto::{decode_signature, fold_signature, NeverRng};

use time::format_description::well_known::iso8601::{self, Iso8601};
use time::format_description::well_known::{Rfc2822, Rfc3339};
use time::{OffsetDateTime, PrimitiveDateTime};

use crate::Error;

/// Parses `timestamp` as an absolute time.
///
/// RFC 3339, ISO 8601 and RFC 2822 forms are accepted. An ISO 8601 date-time without an offset is
/// taken to be UTC.
pub fn parse_time(timestamp: &str) -> Result<OffsetDateTime, Error> {
    let timestamp = timestamp.trim();
    OffsetDateTime::parse(timestamp, &Rfc3339)
        .or_else(|_| OffsetDateTime::parse(timestamp, &Iso8601::PARSING))
        .or_else(|_| OffsetDateTime::parse(timestamp, &Rfc2822))
        .or_else(|_| {
            PrimitiveDateTime::parse(timestamp, &Iso8601::PARSING)
                .map(PrimitiveDateTime::assume_utc)
        })
        .map_err(|_| Error::InvalidTimestamp(timestamp.to_owned()))
}

/// Formats `time` in UTC as `YYYY-MM-DDTHH:MM:SSZ`.
///
/// Years outside of `0000..=9999` have no four-digit form and are rejected.
pub fn format_iso8601_time(time: OffsetDateTime) -> Result<String, Error> {
    const FORMAT: Iso8601<
        {
            iso8601::Config::DEFAULT
                .set_year_is_six_digits(false)
                // Whole seconds only; fractions are truncated.
                .set_time_precision(iso8601::TimePrecision::Second {
                    decimal_digits: None,
                })
                .encode()
        },
    > = Iso8601;

    let time = time.to_offset(time::UtcOffset::UTC);
    time.format(&FORMAT).map_err(|_| Error::InvalidTimestamp(time.to_string()))
}
