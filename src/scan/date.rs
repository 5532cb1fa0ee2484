use std::sync::OnceLock;

use chrono::NaiveDate;
use regex::Regex;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("no 'D Mon YYYY' date found in header value '{raw}'")]
pub struct DateFormatError {
    pub raw: String,
}

fn boundary_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\d{1,2} (Jan|Feb|Mar|Apr|May|Jun|Jul|Aug|Sep|Oct|Nov|Dec) \d{4}")
            .expect("compile date boundary regex")
    })
}

/// Pull the calendar date out of a raw Date header. The header is usually a
/// full RFC 5322 value ("Mon, 2 Jan 2023 10:04:00 -0700"); only the embedded
/// day/month/year portion matters for the cutoff comparison, so time of day
/// and timezone are discarded.
///
/// Failure here is a hard error: the cutoff date is what bounds how far back
/// the scan reaches, so an unreadable date must abort rather than be skipped.
pub fn parse_date_boundary(raw: &str) -> Result<NaiveDate, DateFormatError> {
    let matched = boundary_pattern()
        .find(raw)
        .ok_or_else(|| DateFormatError {
            raw: raw.to_string(),
        })?;

    NaiveDate::parse_from_str(matched.as_str(), "%d %b %Y").map_err(|_| DateFormatError {
        raw: raw.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::parse_date_boundary;

    fn date(year: i32, month: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(year, month, day).unwrap()
    }

    #[test]
    fn parses_date_embedded_in_rfc5322_header() {
        assert_eq!(
            parse_date_boundary("Mon, 2 Jan 2023 10:04:00 -0700 (PDT)").unwrap(),
            date(2023, 1, 2)
        );
    }

    #[test]
    fn parses_two_digit_day() {
        assert_eq!(
            parse_date_boundary("Fri, 17 Nov 2023 23:59:59 +0000").unwrap(),
            date(2023, 11, 17)
        );
    }

    #[test]
    fn parses_bare_date_without_weekday_or_time() {
        assert_eq!(parse_date_boundary("5 Aug 2021").unwrap(), date(2021, 8, 5));
    }

    #[test]
    fn first_match_wins_when_multiple_dates_present() {
        assert_eq!(
            parse_date_boundary("resent 3 Feb 2022 original 1 Jan 2020").unwrap(),
            date(2022, 2, 3)
        );
    }

    #[test]
    fn garbled_header_is_a_hard_error() {
        let error = parse_date_boundary("garbled-not-a-date").unwrap_err();
        assert_eq!(error.raw, "garbled-not-a-date");
    }

    #[test]
    fn empty_header_is_a_hard_error() {
        assert!(parse_date_boundary("").is_err());
    }

    #[test]
    fn numeric_month_does_not_match() {
        assert!(parse_date_boundary("2023-01-02T10:04:00Z").is_err());
    }
}
