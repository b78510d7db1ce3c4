use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;

use crate::error::BotError;

const MINUTE: u64 = 60;
const HOUR: u64 = 60 * MINUTE;
const DAY: u64 = 24 * HOUR;
const WEEK: u64 = 7 * DAY;
const MONTH: u64 = 31 * DAY;
const YEAR: u64 = 365 * DAY;

// Longer spellings first so the alternation does not stop at a prefix ("mo" vs "m").
static DURATION_PART: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)(\d+)\s*(years|year|yrs|yr|y|months|month|mos|mo|weeks|week|wks|wk|w|days|day|dys|dy|d|hours|hour|hrs|hr|h|minutes|mins|min|mns|mn|m|seconds|secs|sec|scs|sc|s)",
    )
    .expect("duration pattern is valid")
});

fn unit_seconds(unit: &str) -> u64 {
    match unit.to_ascii_lowercase().as_str() {
        "y" | "yr" | "yrs" | "year" | "years" => YEAR,
        "mo" | "mos" | "month" | "months" => MONTH,
        "w" | "wk" | "wks" | "week" | "weeks" => WEEK,
        "d" | "dy" | "dys" | "day" | "days" => DAY,
        "h" | "hr" | "hrs" | "hour" | "hours" => HOUR,
        "m" | "mn" | "mns" | "min" | "mins" | "minutes" => MINUTE,
        _ => 1,
    }
}

/// Parses text such as `1h30m` or `2 days 5min` into a duration.
///
/// Every `<number><unit>` pair is summed and may be joined by commas, `and` or `&`,
/// as in `1h and 30m`. Any other text, or no pair at all, is rejected.
pub fn parse_duration(text: &str) -> Result<Duration, BotError> {
    let mut total: u64 = 0;
    let mut matched = false;

    for captures in DURATION_PART.captures_iter(text) {
        let amount: u64 = captures[1]
            .parse()
            .map_err(|_| BotError::bad_argument(format!("`{}` is too large", &captures[1])))?;
        total = amount
            .checked_mul(unit_seconds(&captures[2]))
            .and_then(|secs| total.checked_add(secs))
            .ok_or_else(|| BotError::bad_argument(format!("`{}` is too long", text)))?;
        matched = true;
    }

    let leftover = DURATION_PART.replace_all(text, " ");
    let is_joiner = |word: &str| word.is_empty() || word.eq_ignore_ascii_case("and") || word == "&";
    if !matched || !leftover.split(|c: char| c.is_whitespace() || c == ',').all(is_joiner) {
        return Err(BotError::bad_argument(format!("`{}` is not a duration", text)));
    }
    Ok(Duration::from_secs(total))
}

/// Renders seconds as `1d 2h 5s`, largest unit first.
pub fn format_duration(mut seconds: u64) -> String {
    const UNITS: [(&str, u64); 7] = [
        ("y", YEAR),
        ("mo", MONTH),
        ("w", WEEK),
        ("d", DAY),
        ("h", HOUR),
        ("m", MINUTE),
        ("s", 1),
    ];

    let mut parts = Vec::new();
    for (suffix, size) in UNITS {
        if seconds >= size {
            parts.push(format!("{}{}", seconds / size, suffix));
            seconds %= size;
        }
    }
    if parts.is_empty() {
        return "0s".to_string();
    }
    parts.join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_compound_durations() {
        assert_eq!(parse_duration("5m").unwrap().as_secs(), 300);
        assert_eq!(parse_duration("3min2s").unwrap().as_secs(), 182);
        assert_eq!(parse_duration("5h30m").unwrap().as_secs(), 5 * 3600 + 30 * 60);
        assert_eq!(parse_duration("1d3min").unwrap().as_secs(), 86_400 + 180);
        assert_eq!(parse_duration("2 weeks").unwrap().as_secs(), 14 * 86_400);
    }

    #[test]
    fn parts_may_be_joined_with_words() {
        assert_eq!(parse_duration("1h and 30m").unwrap().as_secs(), 5_400);
        assert_eq!(parse_duration("2 days, 3 hours & 10 minutes").unwrap().as_secs(), 2 * 86_400 + 3 * 3_600 + 600);
        assert_eq!(parse_duration("1h AND 1s").unwrap().as_secs(), 3_601);
        assert!(parse_duration("and").is_err());
    }

    #[test]
    fn month_is_not_read_as_minutes() {
        assert_eq!(parse_duration("1mo").unwrap().as_secs(), 31 * 86_400);
        assert_eq!(parse_duration("1y").unwrap().as_secs(), 365 * 86_400);
    }

    #[test]
    fn rejects_text_without_units() {
        assert!(matches!(parse_duration("spamming"), Err(BotError::BadArgument(_))));
        assert!(parse_duration("15").is_err());
        assert!(parse_duration("5m and then some").is_err());
    }

    #[test]
    fn formats_largest_unit_first() {
        assert_eq!(format_duration(300), "5m");
        assert_eq!(format_duration(86_400 + 7_205), "1d 2h 5s");
        assert_eq!(format_duration(0), "0s");
    }
}
