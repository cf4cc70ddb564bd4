//! RFC 1982 serial-number arithmetic and policy-driven serial generation.

use std::fmt;

use domain::base::Serial;
use jiff::{Timestamp as JiffTimestamp, Zoned, tz::TimeZone};
use serde::{Deserialize, Serialize};

//----------- SerialOrdering -------------------------------------------------

/// The result of comparing two serials under [RFC 1982].
///
/// Unlike a normal total order, two serials can be mutually incomparable:
/// this happens when they differ by exactly 2^31, in which case RFC 1982
/// leaves the ordering undefined.
///
/// [RFC 1982]: https://www.rfc-editor.org/rfc/rfc1982
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SerialOrdering {
    Less,
    Equal,
    Greater,
    Incomparable,
}

/// Compare two serials under RFC 1982 serial-number arithmetic.
///
/// `domain`'s [`Serial`] already implements [`PartialOrd`] per RFC 1982,
/// returning `None` for the incomparable case; this just gives that case a
/// name instead of leaving callers to match on an `Option`.
pub fn compare(a: Serial, b: Serial) -> SerialOrdering {
    match a.partial_cmp(&b) {
        Some(std::cmp::Ordering::Less) => SerialOrdering::Less,
        Some(std::cmp::Ordering::Equal) => SerialOrdering::Equal,
        Some(std::cmp::Ordering::Greater) => SerialOrdering::Greater,
        None => SerialOrdering::Incomparable,
    }
}

/// Is `candidate` not older than `reference`, under RFC 1982 arithmetic?
///
/// This treats `Incomparable` as "not older", matching the refresh
/// controller's "remote serial >= local" test: an incomparable pair is a
/// configuration error on the operator's part (a serial jumped by ~2^31),
/// and the engine prefers to attempt a transfer rather than silently stall.
pub fn is_current_or_ahead(candidate: Serial, reference: Serial) -> bool {
    !matches!(compare(candidate, reference), SerialOrdering::Less)
}

//----------- SerialPolicy ---------------------------------------------------

/// How the next serial for a locally (re-)signed zone is computed.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SerialPolicy {
    /// Add a fixed increment to the previous serial.
    Increment,

    /// Use the current unix timestamp, never decreasing.
    UnixTime,

    /// Use `YYYYMMDDnn`, never decreasing.
    DateSerial,
}

impl fmt::Display for SerialPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SerialPolicy::Increment => "increment",
            SerialPolicy::UnixTime => "unix time",
            SerialPolicy::DateSerial => "date serial",
        })
    }
}

/// An optional `R/M[+A]` modulo alignment applied after the base policy.
///
/// After the base serial is computed, it is shifted by `shift` and then
/// rounded up to the next value congruent to `remainder` modulo `modulus`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerialModulo {
    pub remainder: u32,
    pub modulus: u32,
    pub shift: i64,
}

/// A malformed `serial-modulo` specification.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct InvalidPolicy;

impl fmt::Display for InvalidPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("invalid serial-modulo specification")
    }
}

impl std::error::Error for InvalidPolicy {}

impl SerialModulo {
    /// Validate the `R/M[+A]` constraints from the configuration surface:
    /// `|A| <= 2_000_000_000`, `M <= 256`, `R < M`.
    pub fn validate(&self) -> Result<(), InvalidPolicy> {
        if self.shift.unsigned_abs() > 2_000_000_000
            || self.modulus > 256
            || self.remainder >= self.modulus
        {
            return Err(InvalidPolicy);
        }
        Ok(())
    }

    fn apply(&self, base: Serial) -> Serial {
        let shifted = if self.shift >= 0 {
            base.add(self.shift as u32)
        } else {
            // Serial arithmetic is modulo 2^32, so subtracting is adding the
            // two's-complement of the magnitude.
            base.add((self.shift.unsigned_abs() as u32).wrapping_neg())
        };

        if self.modulus == 0 {
            return shifted;
        }

        let value: u32 = shifted.into_int();
        let current_remainder = value % self.modulus;
        let delta = if current_remainder <= self.remainder {
            self.remainder - current_remainder
        } else {
            self.modulus - (current_remainder - self.remainder)
        };
        shifted.add(delta)
    }
}

/// Compute the next serial for a signed zone under `policy`, never going
/// backwards (under RFC 1982) relative to `prev`.
///
/// `increment` is only consulted by [`SerialPolicy::Increment`].
pub fn next_serial(
    prev: Option<Serial>,
    policy: SerialPolicy,
    increment: u32,
    modulo: Option<SerialModulo>,
) -> Result<Serial, InvalidPolicy> {
    if let Some(modulo) = &modulo {
        modulo.validate()?;
    }

    let base = match policy {
        SerialPolicy::Increment => match prev {
            Some(prev) => prev.add(increment.max(1)),
            None => Serial::now(),
        },
        SerialPolicy::UnixTime => {
            let now = Serial::now();
            match prev {
                Some(prev) if !matches!(compare(now, prev), SerialOrdering::Greater) => {
                    prev.add(1)
                }
                _ => now,
            }
        }
        SerialPolicy::DateSerial => {
            let zone = Zoned::new(JiffTimestamp::now(), TimeZone::UTC);
            let today: Serial = date_serial_base(&zone).into();
            match prev {
                Some(prev) if !matches!(compare(today, prev), SerialOrdering::Greater) => {
                    prev.add(1)
                }
                _ => today,
            }
        }
    };

    Ok(match modulo {
        Some(modulo) => modulo.apply(base),
        None => base,
    })
}

/// The `YYYYMMDD00` base for [`SerialPolicy::DateSerial`], before the `nn`
/// bump loop in `next_serial` advances it past a prior same-day serial.
fn date_serial_base(zone: &Zoned) -> u32 {
    ((zone.year() as u32 * 100 + zone.month() as u32) * 100 + zone.day() as u32) * 100
}

#[cfg(test)]
mod tests {
    use super::*;
    use jiff::civil::date;

    #[test]
    fn date_serial_base_formats_as_yyyymmdd00() {
        let zone = date(2026, 7, 28).to_zoned(TimeZone::UTC).unwrap();
        assert_eq!(date_serial_base(&zone), 2026_07_28_00);
    }

    #[test]
    fn rfc1982_compare_simple() {
        let a = Serial::from(1);
        let b = Serial::from(2);
        assert_eq!(compare(a, b), SerialOrdering::Less);
        assert_eq!(compare(b, a), SerialOrdering::Greater);
        assert_eq!(compare(a, a), SerialOrdering::Equal);
    }

    #[test]
    fn rfc1982_wrap_around() {
        // 1 is "greater" than u32::MAX because serial space wraps.
        let wrapped = Serial::from(u32::MAX);
        let next = Serial::from(0);
        assert_eq!(compare(next, wrapped), SerialOrdering::Greater);
    }

    #[test]
    fn rfc1982_incomparable_at_half_range() {
        let a = Serial::from(0);
        let b = Serial::from(1u32 << 31);
        assert_eq!(compare(a, b), SerialOrdering::Incomparable);
    }

    #[test]
    fn modulo_rejects_bad_shift() {
        let bad = SerialModulo {
            remainder: 5,
            modulus: 3,
            shift: 0,
        };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn modulo_rejects_oversized_modulus() {
        let bad = SerialModulo {
            remainder: 0,
            modulus: 257,
            shift: 0,
        };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn increment_policy_never_goes_backwards() {
        let prev = Serial::from(100);
        let next = next_serial(Some(prev), SerialPolicy::Increment, 1, None).unwrap();
        assert_eq!(compare(next, prev), SerialOrdering::Greater);
    }

    #[test]
    fn modulo_alignment_rounds_up() {
        let modulo = SerialModulo {
            remainder: 1,
            modulus: 10,
            shift: 0,
        };
        let aligned = modulo.apply(Serial::from(23));
        assert_eq!(aligned.into_int(), 31);
    }
}
