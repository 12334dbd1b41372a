//! Duration grammar for CLI arguments.
//!
//! Accepts an accumulator of `<int><unit>` tokens where unit is one of
//! `d`, `h`, `m`, `s`. Tokens may appear in any order, may repeat, and may
//! be separated by whitespace or concatenated:
//! - `45s`
//! - `1h30m`
//! - `1d 2h 3m`
//! - `10m 1d 59s 2h`
//!
//! Repeated units are summed, so the grammar is a monoid:
//! `parse("1h 30m") == parse("30m 1h") == parse("1h") + parse("30m")`.
//! The result is integer seconds.

/// Error type for duration parsing failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DurationParseError {
    pub input: String,
    pub message: String,
}

impl std::fmt::Display for DurationParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Failed to parse duration '{}': {}",
            self.input, self.message
        )
    }
}

impl std::error::Error for DurationParseError {}

const SECONDS_PER_MINUTE: u64 = 60;
const SECONDS_PER_HOUR: u64 = 3600;
const SECONDS_PER_DAY: u64 = 86400;

/// Parses a duration expression into total seconds.
///
/// # Examples
///
/// ```
/// use colstress::config::parse_duration;
///
/// assert_eq!(parse_duration("1h30m").unwrap(), 5400);
/// assert_eq!(parse_duration("10m 1d 59s 2h").unwrap(), 94259);
/// ```
pub fn parse_duration(input: &str) -> Result<u64, DurationParseError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(error(input, "empty duration"));
    }

    let mut total: u64 = 0;
    let mut digits = String::new();
    let mut saw_token = false;

    for c in trimmed.chars() {
        if c.is_ascii_digit() {
            digits.push(c);
            continue;
        }

        if c.is_whitespace() {
            if !digits.is_empty() {
                return Err(error(input, "number without a unit (expected d, h, m or s)"));
            }
            continue;
        }

        if digits.is_empty() {
            return Err(error(input, &format!("unexpected character '{}'", c)));
        }

        let value: u64 = digits
            .parse()
            .map_err(|_| error(input, &format!("invalid number '{}'", digits)))?;
        digits.clear();

        let seconds = match c {
            's' => value,
            'm' => value.checked_mul(SECONDS_PER_MINUTE).ok_or_else(|| error(input, "overflow"))?,
            'h' => value.checked_mul(SECONDS_PER_HOUR).ok_or_else(|| error(input, "overflow"))?,
            'd' => value.checked_mul(SECONDS_PER_DAY).ok_or_else(|| error(input, "overflow"))?,
            _ => {
                return Err(error(
                    input,
                    &format!("unknown unit '{}' (expected d, h, m or s)", c),
                ));
            }
        };

        total = total
            .checked_add(seconds)
            .ok_or_else(|| error(input, "overflow"))?;
        saw_token = true;
    }

    if !digits.is_empty() {
        return Err(error(input, "number without a unit (expected d, h, m or s)"));
    }
    if !saw_token {
        return Err(error(input, "no duration tokens found"));
    }

    Ok(total)
}

fn error(input: &str, message: &str) -> DurationParseError {
    DurationParseError {
        input: input.to_string(),
        message: message.to_string(),
    }
}
