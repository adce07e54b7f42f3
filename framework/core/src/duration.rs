use std::time::Duration;

#[derive(derive_more::Display, derive_more::Error, Debug, Clone, PartialEq, Eq)]
pub enum DurationParseError {
    #[display("duration is empty")]
    Empty,
    #[display("invalid number in duration `{input}`")]
    InvalidNumber { input: String },
    #[display("missing unit after `{number}` in duration `{input}`, expected one of ms, s, m, h")]
    MissingUnit { input: String, number: String },
    #[display("unknown unit `{unit}` in duration `{input}`, expected one of ms, s, m, h")]
    UnknownUnit { input: String, unit: String },
    #[display("duration `{input}` is too large")]
    Overflow { input: String },
}

/// Parse a human duration such as `500ms`, `30s`, `1m30s` or `2h`.
///
/// Components may be fractional (`1.5s`) and are summed. A bare `0` is accepted. Whole-number
/// components are parsed by [humantime].
pub fn parse_duration(input: &str) -> Result<Duration, DurationParseError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(DurationParseError::Empty);
    }
    if trimmed == "0" {
        return Ok(Duration::ZERO);
    }

    let mut total = Duration::ZERO;
    let mut rest = trimmed;
    while !rest.is_empty() {
        let number_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        let (number, tail) = rest.split_at(number_len);
        if number.is_empty() {
            return Err(DurationParseError::InvalidNumber {
                input: input.to_string(),
            });
        }

        let unit_len = tail
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(tail.len());
        let (unit, tail) = tail.split_at(unit_len);
        let seconds_per_unit = match unit {
            "ms" => 0.001,
            "s" => 1.0,
            "m" => 60.0,
            "h" => 3600.0,
            "" => {
                return Err(DurationParseError::MissingUnit {
                    input: input.to_string(),
                    number: number.to_string(),
                })
            }
            other => {
                return Err(DurationParseError::UnknownUnit {
                    input: input.to_string(),
                    unit: other.to_string(),
                })
            }
        };

        let component = if number.contains('.') {
            fractional_component(input, number, seconds_per_unit)?
        } else {
            humantime::parse_duration(&format!("{number}{unit}")).map_err(|e| match e {
                humantime::DurationError::NumberOverflow => DurationParseError::Overflow {
                    input: input.to_string(),
                },
                _ => DurationParseError::InvalidNumber {
                    input: input.to_string(),
                },
            })?
        };

        total = total
            .checked_add(component)
            .ok_or_else(|| DurationParseError::Overflow {
                input: input.to_string(),
            })?;
        rest = tail;
    }

    Ok(total)
}

fn fractional_component(
    input: &str,
    number: &str,
    seconds_per_unit: f64,
) -> Result<Duration, DurationParseError> {
    let value: f64 = number
        .parse()
        .map_err(|_| DurationParseError::InvalidNumber {
            input: input.to_string(),
        })?;

    Duration::try_from_secs_f64(value * seconds_per_unit).map_err(|_| {
        DurationParseError::Overflow {
            input: input.to_string(),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_compound_durations() {
        assert_eq!(Duration::from_secs(90), parse_duration("1m30s").unwrap());
        assert_eq!(Duration::from_millis(500), parse_duration("500ms").unwrap());
        assert_eq!(Duration::from_secs(7200), parse_duration("2h").unwrap());
        assert_eq!(Duration::from_millis(1500), parse_duration("1.5s").unwrap());
        assert_eq!(Duration::ZERO, parse_duration("0").unwrap());
    }

    #[test]
    fn reject_bad_durations() {
        assert_eq!(Err(DurationParseError::Empty), parse_duration(" "));
        assert!(matches!(
            parse_duration("10"),
            Err(DurationParseError::MissingUnit { .. })
        ));
        assert!(matches!(
            parse_duration("10d"),
            Err(DurationParseError::UnknownUnit { .. })
        ));
        assert!(matches!(
            parse_duration("s"),
            Err(DurationParseError::InvalidNumber { .. })
        ));
        assert!(matches!(
            parse_duration("1.2.3s"),
            Err(DurationParseError::InvalidNumber { .. })
        ));
    }

    #[test]
    fn reject_durations_that_overflow() {
        for input in [
            "99999999999999999999h",
            "18446744073709551615h",
            "99999999999999999999.5h",
            "18446744073709551615s1h",
        ] {
            assert_eq!(
                Err(DurationParseError::Overflow {
                    input: input.to_string()
                }),
                parse_duration(input),
                "{input}"
            );
        }
    }
}
