//! Decoding a verified frame payload into a typed [Transmission].
//!
//! The device reports "no data" per field with a `?` placeholder rather
//! than omitting the field, so absence is modeled as `Option` throughout
//! instead of overloading zero or the empty string. Fields are validated
//! independently; a single transmission may freely mix known and unknown
//! fields.

use std::fmt::Display;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::protocol::code;
use crate::{Error, Result};

/// Wire placeholder character marking a field as unknown.
pub const PLACEHOLDER: char = '?';

/// Number of header fields preceding the shot data.
const HEADER_FIELDS: usize = 6;

/// Raw sub-fields per shot: ring, divisor, x, y.
const FIELDS_PER_SHOT: usize = 4;

/// Target sheet types the device can score, by their wire mnemonic.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetType {
    /// `LG`, air rifle (Luftgewehr)
    Lg,
    /// `LP`, air pistol (Luftpistole)
    Lp,
    /// `KK`, smallbore (Kleinkaliber)
    Kk,
    /// `ZS`, parlor rifle (Zimmerstutzen)
    Zs,
    /// `LS`, light shooting (Lichtschiessen)
    Ls,
}

impl FromStr for TargetType {
    type Err = ();

    fn from_str(s: &str) -> std::result::Result<Self, ()> {
        match s {
            "LG" => Ok(Self::Lg),
            "LP" => Ok(Self::Lp),
            "KK" => Ok(Self::Kk),
            "ZS" => Ok(Self::Zs),
            "LS" => Ok(Self::Ls),
            _ => Err(()),
        }
    }
}

impl Display for TargetType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Lg => "LG",
            Self::Lp => "LP",
            Self::Kk => "KK",
            Self::Zs => "ZS",
            Self::Ls => "LS",
        };
        write!(f, "{s}")
    }
}

/// One scored shot. Immutable once decoded.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Default)]
pub struct Shot {
    /// Ring score. A shot without one is invalid.
    pub ring: Option<f64>,
    /// Divisor/offset magnitude.
    pub divisor: Option<f64>,
    /// Horizontal offset from target center.
    pub x: Option<i32>,
    /// Vertical offset from target center.
    pub y: Option<i32>,
}

impl Shot {
    /// Synthetic missed shot used to pad short strips.
    #[must_use]
    pub fn miss() -> Self {
        Shot {
            ring: Some(0.0),
            ..Shot::default()
        }
    }

    /// A shot counts iff it has a ring score.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.ring.is_some()
    }

    /// Ring of zero with no divisor means the strip position was missed.
    #[must_use]
    pub fn is_miss(&self) -> bool {
        matches!(self.ring, Some(r) if r == 0.0) && self.divisor.is_none()
    }

    /// Positive ring with no divisor means an operator override rather
    /// than a device measurement.
    #[must_use]
    pub fn is_manual(&self) -> bool {
        matches!(self.ring, Some(r) if r > 0.0) && self.divisor.is_none()
    }
}

/// One decoded device frame: the scoring of a single strip.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct Transmission {
    /// 8-digit strip barcode.
    pub barcode: Option<String>,
    /// 8-digit manually keyed code.
    pub manual_code: Option<String>,
    pub target_type: Option<TargetType>,
    /// 2-digit target number.
    pub target_num: Option<u8>,
    /// Divisor factor, wire format `d.d`.
    pub divisor: Option<f64>,
    /// Shot count the device claims to have scored.
    pub declared_shots: Option<u8>,
    /// Shots in strip order.
    pub shots: Vec<Shot>,
}

impl Transmission {
    /// Decode a checksum-verified payload.
    ///
    /// The payload is CR-separated ASCII: six header fields followed by
    /// four sub-fields per shot. Unknown or invalid fields decode to
    /// `None`; only structural violations are errors.
    ///
    /// # Errors
    /// [Error::Decode] if there are fewer than six header fields or the
    /// shot remainder is not a multiple of four sub-fields.
    pub fn decode(payload: &[u8]) -> Result<Self> {
        let parts: Vec<&[u8]> = payload.split(|&b| b == code::CR).collect();
        if parts.len() < HEADER_FIELDS {
            return Err(Error::Decode(format!(
                "expected {HEADER_FIELDS} header fields, got {}",
                parts.len()
            )));
        }
        let (header, rest) = parts.split_at(HEADER_FIELDS);

        // The device terminates the shot data with a separator, so empty
        // trailing segments are expected and dropped.
        let shot_fields: Vec<&str> = rest
            .iter()
            .filter(|p| !p.is_empty())
            .map(|p| field_text(p))
            .collect();
        if shot_fields.len() % FIELDS_PER_SHOT != 0 {
            return Err(Error::Decode(format!(
                "shot data is {} fields, not a multiple of {FIELDS_PER_SHOT}",
                shot_fields.len()
            )));
        }

        let shots = shot_fields
            .chunks(FIELDS_PER_SHOT)
            .map(|c| Shot {
                ring: decode_field(c[0], |s| s.parse().ok()),
                divisor: decode_field(c[1], |s| s.parse().ok()),
                x: decode_field(c[2], |s| s.parse().ok()),
                y: decode_field(c[3], |s| s.parse().ok()),
            })
            .collect();

        Ok(Transmission {
            barcode: decode_field(field_text(header[0]), decode_code),
            manual_code: decode_field(field_text(header[1]), decode_code),
            target_type: decode_field(field_text(header[2]), |s| s.parse().ok()),
            target_num: decode_field(field_text(header[3]), decode_two_digits),
            divisor: decode_field(field_text(header[4]), decode_divisor),
            declared_shots: decode_field(field_text(header[5]), decode_two_digits),
            shots,
        })
    }

    /// Shots with a ring score, in strip order.
    #[must_use]
    pub fn valid_shots(&self) -> Vec<Shot> {
        self.shots.iter().filter(|s| s.is_valid()).copied().collect()
    }

    #[must_use]
    pub fn num_valid(&self) -> usize {
        self.shots.iter().filter(|s| s.is_valid()).count()
    }

    #[must_use]
    pub fn num_invalid(&self) -> usize {
        self.shots.len() - self.num_valid()
    }

    #[must_use]
    pub fn num_manual(&self) -> usize {
        self.shots.iter().filter(|s| s.is_manual()).count()
    }
}

impl Display for Transmission {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Transmission{{barcode:{:?}, target:{:?}, shots:[len={} valid={}]}}",
            self.barcode,
            self.target_type,
            self.shots.len(),
            self.num_valid()
        )
    }
}

/// Raw field bytes as text. Non-ASCII wire bytes can never satisfy a
/// validity pattern, so they map to the placeholder.
fn field_text(raw: &[u8]) -> &str {
    std::str::from_utf8(raw).unwrap_or("?")
}

/// The per-field decode rule: placeholder marker or pattern failure means
/// unknown, anything else parses to its typed value.
fn decode_field<T>(s: &str, parse: impl Fn(&str) -> Option<T>) -> Option<T> {
    if s.contains(PLACEHOLDER) {
        return None;
    }
    parse(s)
}

fn decode_code(s: &str) -> Option<String> {
    (s.len() == 8 && s.bytes().all(|b| b.is_ascii_digit())).then(|| s.to_string())
}

fn decode_two_digits(s: &str) -> Option<u8> {
    if s.len() == 2 && s.bytes().all(|b| b.is_ascii_digit()) {
        s.parse().ok()
    } else {
        None
    }
}

fn decode_divisor(s: &str) -> Option<f64> {
    let b = s.as_bytes();
    if b.len() == 3 && b[0].is_ascii_digit() && b[1] == b'.' && b[2].is_ascii_digit() {
        s.parse().ok()
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    fn payload(fields: &[&str]) -> Vec<u8> {
        fields.join("\r").into_bytes()
    }

    #[test_case("12345678", Some("12345678"); "valid")]
    #[test_case("1234567", None; "too short")]
    #[test_case("123456789", None; "too long")]
    #[test_case("1234567a", None; "non digit")]
    #[test_case("????????", None; "placeholder")]
    #[test_case("1234?678", None; "embedded placeholder")]
    fn barcode_field(raw: &str, expected: Option<&str>) {
        assert_eq!(
            decode_field(raw, decode_code),
            expected.map(String::from)
        );
    }

    #[test_case("LG", Some(TargetType::Lg))]
    #[test_case("LS", Some(TargetType::Ls))]
    #[test_case("XX", None)]
    #[test_case("?", None)]
    #[test_case("lg", None; "case sensitive")]
    fn target_type_field(raw: &str, expected: Option<TargetType>) {
        assert_eq!(decode_field(raw, |s| s.parse().ok()), expected);
    }

    #[test_case("1.5", Some(1.5))]
    #[test_case("0.0", Some(0.0))]
    #[test_case("10.5", None; "two integer digits")]
    #[test_case("1.55", None; "two fraction digits")]
    #[test_case("1,5", None; "wrong separator")]
    #[test_case("?.?", None)]
    fn divisor_field(raw: &str, expected: Option<f64>) {
        assert_eq!(decode_field(raw, decode_divisor), expected);
    }

    #[test_case("07", Some(7))]
    #[test_case("42", Some(42))]
    #[test_case("7", None; "one digit")]
    #[test_case("123", None; "three digits")]
    #[test_case("??", None)]
    fn two_digit_field(raw: &str, expected: Option<u8>) {
        assert_eq!(decode_field(raw, decode_two_digits), expected);
    }

    #[test]
    fn decode_full_transmission() {
        let dat = payload(&[
            "12345678", "87654321", "LG", "03", "1.2", "02", // header
            "10.3", "12.4", "-5", "17", // normal shot
            "0.0", "?", "?", "?", // missed shot
            "", // trailing separator
        ]);
        let t = Transmission::decode(&dat).unwrap();
        assert_eq!(t.barcode.as_deref(), Some("12345678"));
        assert_eq!(t.manual_code.as_deref(), Some("87654321"));
        assert_eq!(t.target_type, Some(TargetType::Lg));
        assert_eq!(t.target_num, Some(3));
        assert_eq!(t.divisor, Some(1.2));
        assert_eq!(t.declared_shots, Some(2));

        assert_eq!(t.shots.len(), 2);
        assert_eq!(t.shots[0].ring, Some(10.3));
        assert_eq!(t.shots[0].divisor, Some(12.4));
        assert_eq!(t.shots[0].x, Some(-5));
        assert_eq!(t.shots[0].y, Some(17));
        assert!(!t.shots[0].is_miss() && !t.shots[0].is_manual());
        assert!(t.shots[1].is_miss());
        assert_eq!(t.num_valid(), 2);
    }

    #[test]
    fn decode_all_placeholders() {
        let dat = payload(&["?", "?", "?", "?", "?", "?"]);
        let t = Transmission::decode(&dat).unwrap();
        assert_eq!(t, Transmission::default());
    }

    #[test]
    fn fields_are_validated_independently() {
        // bad barcode and target type must not disturb the other fields
        let dat = payload(&["123", "87654321", "QQ", "05", "?", "10"]);
        let t = Transmission::decode(&dat).unwrap();
        assert_eq!(t.barcode, None);
        assert_eq!(t.manual_code.as_deref(), Some("87654321"));
        assert_eq!(t.target_type, None);
        assert_eq!(t.target_num, Some(5));
        assert_eq!(t.divisor, None);
        assert_eq!(t.declared_shots, Some(10));
    }

    #[test]
    fn invalid_shot_subfields_decode_absent() {
        let dat = payload(&["?", "?", "?", "?", "?", "?", "9.9", "?", "abc", "3"]);
        let t = Transmission::decode(&dat).unwrap();
        assert_eq!(t.shots.len(), 1);
        let s = t.shots[0];
        assert_eq!(s.ring, Some(9.9));
        assert_eq!(s.divisor, None);
        assert_eq!(s.x, None);
        assert_eq!(s.y, Some(3));
        assert!(s.is_manual());
    }

    #[test]
    fn decode_fails_on_short_header() {
        let dat = payload(&["12345678", "?", "LG"]);
        assert!(matches!(
            Transmission::decode(&dat),
            Err(Error::Decode(_))
        ));
    }

    #[test]
    fn decode_fails_on_ragged_shot_data() {
        let dat = payload(&["?", "?", "?", "?", "?", "?", "9.0", "1.1", "0"]);
        assert!(matches!(
            Transmission::decode(&dat),
            Err(Error::Decode(_))
        ));
    }

    #[test]
    fn manual_correction_counting() {
        let dat = payload(&[
            "?", "?", "?", "?", "?", "?", // header all unknown
            "8.0", "?", "?", "?", // manual correction
            "0.0", "?", "?", "?", // miss
            "7.2", "3.1", "1", "2", // normal
        ]);
        let t = Transmission::decode(&dat).unwrap();
        assert_eq!(t.num_manual(), 1);
        assert_eq!(t.num_valid(), 3);
        assert_eq!(t.num_invalid(), 0);
    }
}
