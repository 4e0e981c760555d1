//! Random request payload generation.

use bytes::Bytes;
use rand::Rng;

/// Byte alphabet of the generated payloads. Spaces are overrepresented to
/// mimic text-shaped content.
const CHARS: &[u8] = b"      abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// Applies the configured deviation to a payload length: the result is
/// uniform in `length` plus or minus `round(length * deviation)`, floored
/// at zero.
pub(crate) fn deviated_length(length: usize, deviation: f64) -> usize {
    let delta = (length as f64 * deviation).round() as i64;
    if delta <= 0 {
        return length;
    }

    let deviated = length as i64 + rand::thread_rng().gen_range(-delta..=delta);
    deviated.max(0) as usize
}

/// Generates `length` bytes of random text.
pub(crate) fn random_text(length: usize) -> Bytes {
    let mut rng = rand::thread_rng();
    let mut body = Vec::with_capacity(length);
    for _ in 0..length {
        body.push(CHARS[rng.gen_range(0..CHARS.len())]);
    }

    Bytes::from(body)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deviated_length_stays_within_bounds() {
        for _ in 0..1000 {
            let length = deviated_length(500, 0.1);
            assert!((450..=550).contains(&length), "length out of bounds: {length}");
        }
    }

    #[test]
    fn zero_deviation_is_exact() {
        assert_eq!(deviated_length(500, 0.0), 500);
        assert_eq!(deviated_length(0, 0.0), 0);
    }

    #[test]
    fn deviation_floors_at_zero() {
        for _ in 0..1000 {
            // Delta is 10x the base length, so the raw range dips far
            // below zero.
            let length = deviated_length(10, 10.0);
            assert!(length <= 110);
        }
    }

    #[test]
    fn random_text_has_requested_length() {
        assert_eq!(random_text(0).len(), 0);
        assert_eq!(random_text(1234).len(), 1234);
    }

    #[test]
    fn random_text_draws_from_the_alphabet() {
        let body = random_text(512);
        assert!(body.iter().all(|b| CHARS.contains(b)));
    }
}
