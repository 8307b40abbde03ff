//! Telemetry payload decoding for tracker tag characteristics.
//!
//! Pure functions, no side effects. The payload layouts are a fixed GATT
//! contract: battery is a single percentage byte, location is two
//! little-endian IEEE-754 single-precision floats (latitude, longitude).

use trackmate_types::{ParseError, ParseResult};

/// Expected battery payload length in bytes.
pub const BATTERY_PAYLOAD_LEN: usize = 1;

/// Expected location payload length in bytes.
pub const LOCATION_PAYLOAD_LEN: usize = 8;

/// Decode a battery notification payload into a percentage.
///
/// # Errors
///
/// - [`ParseError::MalformedPayload`] if the payload is not exactly 1 byte
/// - [`ParseError::OutOfRangeValue`] if the value exceeds 100
pub fn decode_battery(payload: &[u8]) -> ParseResult<u8> {
    if payload.len() != BATTERY_PAYLOAD_LEN {
        return Err(ParseError::MalformedPayload {
            expected: BATTERY_PAYLOAD_LEN,
            actual: payload.len(),
        });
    }

    let percent = payload[0];
    if percent > 100 {
        return Err(ParseError::OutOfRangeValue(format!(
            "battery {}% exceeds 100%",
            percent
        )));
    }

    Ok(percent)
}

/// Decode a location notification payload into a (latitude, longitude) pair.
///
/// Bytes 0-3 are the latitude, bytes 4-7 the longitude, both little-endian
/// IEEE-754 single-precision floats.
///
/// # Errors
///
/// - [`ParseError::MalformedPayload`] if the payload is not exactly 8 bytes
/// - [`ParseError::OutOfRangeValue`] if either float is NaN/infinite or the
///   coordinates fall outside [-90, 90] / [-180, 180]
pub fn decode_location(payload: &[u8]) -> ParseResult<(f64, f64)> {
    if payload.len() != LOCATION_PAYLOAD_LEN {
        return Err(ParseError::MalformedPayload {
            expected: LOCATION_PAYLOAD_LEN,
            actual: payload.len(),
        });
    }

    let latitude = f32::from_le_bytes([payload[0], payload[1], payload[2], payload[3]]);
    let longitude = f32::from_le_bytes([payload[4], payload[5], payload[6], payload[7]]);

    if !latitude.is_finite() || !longitude.is_finite() {
        return Err(ParseError::OutOfRangeValue(
            "coordinate is NaN or infinite".to_string(),
        ));
    }
    if !(-90.0..=90.0).contains(&latitude) {
        return Err(ParseError::OutOfRangeValue(format!(
            "latitude {} outside [-90, 90]",
            latitude
        )));
    }
    if !(-180.0..=180.0).contains(&longitude) {
        return Err(ParseError::OutOfRangeValue(format!(
            "longitude {} outside [-180, 180]",
            longitude
        )));
    }

    Ok((f64::from(latitude), f64::from(longitude)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn encode_location(lat: f32, lng: f32) -> [u8; 8] {
        let mut buf = [0u8; 8];
        buf[..4].copy_from_slice(&lat.to_le_bytes());
        buf[4..].copy_from_slice(&lng.to_le_bytes());
        buf
    }

    #[test]
    fn test_decode_battery_valid() {
        assert_eq!(decode_battery(&[0]).unwrap(), 0);
        assert_eq!(decode_battery(&[0x4B]).unwrap(), 75);
        assert_eq!(decode_battery(&[100]).unwrap(), 100);
    }

    #[test]
    fn test_decode_battery_wrong_length() {
        assert!(matches!(
            decode_battery(&[]),
            Err(ParseError::MalformedPayload {
                expected: 1,
                actual: 0
            })
        ));
        assert!(matches!(
            decode_battery(&[75, 0]),
            Err(ParseError::MalformedPayload {
                expected: 1,
                actual: 2
            })
        ));
    }

    #[test]
    fn test_decode_battery_over_100() {
        assert!(matches!(
            decode_battery(&[101]),
            Err(ParseError::OutOfRangeValue(_))
        ));
        assert!(matches!(
            decode_battery(&[0xFF]),
            Err(ParseError::OutOfRangeValue(_))
        ));
    }

    #[test]
    fn test_decode_location_valid() {
        let payload = encode_location(37.7749, -122.4194);
        let (lat, lng) = decode_location(&payload).unwrap();
        assert_eq!(lat as f32, 37.7749);
        assert_eq!(lng as f32, -122.4194);
    }

    #[test]
    fn test_decode_location_boundaries() {
        assert!(decode_location(&encode_location(90.0, 180.0)).is_ok());
        assert!(decode_location(&encode_location(-90.0, -180.0)).is_ok());
        assert!(decode_location(&encode_location(0.0, 0.0)).is_ok());
    }

    #[test]
    fn test_decode_location_wrong_length() {
        assert!(matches!(
            decode_location(&[0; 7]),
            Err(ParseError::MalformedPayload {
                expected: 8,
                actual: 7
            })
        ));
        assert!(matches!(
            decode_location(&[0; 9]),
            Err(ParseError::MalformedPayload { .. })
        ));
    }

    #[test]
    fn test_decode_location_out_of_range() {
        assert!(matches!(
            decode_location(&encode_location(90.5, 0.0)),
            Err(ParseError::OutOfRangeValue(_))
        ));
        assert!(matches!(
            decode_location(&encode_location(0.0, -180.5)),
            Err(ParseError::OutOfRangeValue(_))
        ));
    }

    #[test]
    fn test_decode_location_non_finite() {
        assert!(matches!(
            decode_location(&encode_location(f32::NAN, 0.0)),
            Err(ParseError::OutOfRangeValue(_))
        ));
        assert!(matches!(
            decode_location(&encode_location(0.0, f32::INFINITY)),
            Err(ParseError::OutOfRangeValue(_))
        ));
        assert!(matches!(
            decode_location(&encode_location(f32::NEG_INFINITY, 0.0)),
            Err(ParseError::OutOfRangeValue(_))
        ));
    }

    proptest! {
        #[test]
        fn prop_battery_in_range_for_valid_payloads(byte in 0u8..=100) {
            let percent = decode_battery(&[byte]).unwrap();
            prop_assert!(percent <= 100);
            prop_assert_eq!(percent, byte);
        }

        #[test]
        fn prop_battery_rejects_other_lengths(payload in proptest::collection::vec(any::<u8>(), 0..16)) {
            prop_assume!(payload.len() != 1);
            prop_assert!(
                matches!(
                    decode_battery(&payload),
                    Err(ParseError::MalformedPayload { .. })
                ),
                "expected MalformedPayload error"
            );
        }

        #[test]
        fn prop_location_round_trips_in_range(
            lat in -90.0f32..=90.0,
            lng in -180.0f32..=180.0,
        ) {
            let (decoded_lat, decoded_lng) = decode_location(&encode_location(lat, lng)).unwrap();
            // Exact round-trip of the encoded f32 values
            prop_assert_eq!(decoded_lat as f32, lat);
            prop_assert_eq!(decoded_lng as f32, lng);
        }

        #[test]
        fn prop_location_rejects_other_lengths(payload in proptest::collection::vec(any::<u8>(), 0..32)) {
            prop_assume!(payload.len() != 8);
            prop_assert!(
                matches!(
                    decode_location(&payload),
                    Err(ParseError::MalformedPayload { .. })
                ),
                "expected MalformedPayload error"
            );
        }
    }
}
