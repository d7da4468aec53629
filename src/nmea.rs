//! Minimal NMEA handling for raw sentences delivered by the engine.
//!
//! Only the magnetic variation of RMC sentences is extracted; positions come
//! from the engine's structured location callback.

/// Trim trailing whitespace and validate the `*hh` checksum.
///
/// Returns the sentence body without the checksum suffix.
pub fn validate(sentence: &str) -> Option<&str> {
    let sentence = sentence.trim_end();
    let body = sentence.strip_prefix('$')?;
    let (payload, checksum) = body.split_once('*')?;
    let digits = std::str::from_utf8(checksum.as_bytes().get(..2)?).ok()?;
    let expected = u8::from_str_radix(digits, 16).ok()?;
    let actual = payload.bytes().fold(0u8, |acc, b| acc ^ b);
    if actual != expected {
        return None;
    }
    Some(&sentence[..1 + payload.len()])
}

/// Magnetic variation in degrees (east positive) from an RMC sentence body.
pub fn rmc_magnetic_variation(sentence: &str) -> Option<f64> {
    if !(sentence.starts_with("$GPRMC") || sentence.starts_with("$GNRMC")) {
        return None;
    }
    let fields: Vec<&str> = sentence.split(',').collect();
    if fields.len() < 12 {
        return None;
    }
    let variation: f64 = fields[10].parse().ok()?;
    if fields[11].starts_with('W') {
        Some(-variation)
    } else {
        Some(variation)
    }
}

/// Magnetic variation carried by a raw sentence, if it is a valid RMC.
pub fn magnetic_variation(raw: &str) -> Option<f64> {
    validate(raw).and_then(rmc_magnetic_variation)
}
