//! Transposition-invariant interval vectors.
//!
//! A tune's melodic fingerprint is the sequence of semitone differences
//! between consecutive pitches, clipped to one octave and padded to a
//! fixed length. Two transpositions of the same melody share the same
//! vector.

/// Fixed vector length used by the similarity index.
pub const VECTOR_LEN: usize = 32;

/// Intervals are clipped to plus/minus one octave.
pub const MAX_INTERVAL: f32 = 12.0;

/// Computes the interval vector for a comma-separated MIDI pitch string.
///
/// Returns the stored rendering: fixed length [`VECTOR_LEN`], zeros as
/// bare `0`, non-zero values with one decimal, joined by `", "`. Empty or
/// unparseable input yields an empty string.
pub fn intervals_from_pitches(pitches: &str) -> String {
    let parsed: Option<Vec<i32>> = pitches
        .split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(|p| p.parse::<i32>().ok())
        .collect();

    let Some(parsed) = parsed else {
        return String::new();
    };
    if parsed.is_empty() {
        return String::new();
    }

    let vector = normalize_intervals(parsed.windows(2).map(|w| (w[1] - w[0]) as f32));
    vector
        .iter()
        .map(|&v| {
            if v == 0.0 {
                "0".to_string()
            } else {
                format!("{v:.1}")
            }
        })
        .collect::<Vec<_>>()
        .join(", ")
}

/// Clips intervals to [`MAX_INTERVAL`] and fits them into a
/// [`VECTOR_LEN`]-sized vector, zero-padded or truncated.
pub fn normalize_intervals(intervals: impl IntoIterator<Item = f32>) -> [f32; VECTOR_LEN] {
    let mut vector = [0.0f32; VECTOR_LEN];
    for (slot, interval) in vector.iter_mut().zip(intervals) {
        *slot = interval.clamp(-MAX_INTERVAL, MAX_INTERVAL);
    }
    vector
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ascending_scale() {
        let rendered = intervals_from_pitches("60, 62, 64, 62");
        assert!(rendered.starts_with("2.0, 2.0, -2.0, 0"));
        assert_eq!(rendered.split(", ").count(), VECTOR_LEN);
    }

    #[test]
    fn test_simple_reel_fragment() {
        let rendered = intervals_from_pitches("67,69,71");
        assert!(rendered.starts_with("2.0, 2.0, 0"));
    }

    #[test]
    fn test_large_leaps_are_clipped() {
        let rendered = intervals_from_pitches("40, 80");
        assert!(rendered.starts_with("12.0, 0"));
        let rendered = intervals_from_pitches("80, 40");
        assert!(rendered.starts_with("-12.0, 0"));
    }

    #[test]
    fn test_long_melodies_are_truncated() {
        let pitches: Vec<String> = (0..100).map(|i| (60 + (i % 2)).to_string()).collect();
        let rendered = intervals_from_pitches(&pitches.join(","));
        assert_eq!(rendered.split(", ").count(), VECTOR_LEN);
    }

    #[test]
    fn test_empty_and_garbage_input() {
        assert_eq!(intervals_from_pitches(""), "");
        assert_eq!(intervals_from_pitches("  "), "");
        assert_eq!(intervals_from_pitches("60, sixty-two"), "");
    }

    #[test]
    fn test_single_pitch_has_no_intervals() {
        let rendered = intervals_from_pitches("60");
        assert!(rendered.starts_with("0, 0"));
        assert_eq!(rendered.split(", ").count(), VECTOR_LEN);
    }

    #[test]
    fn test_transposition_invariance() {
        assert_eq!(
            intervals_from_pitches("60,64,67"),
            intervals_from_pitches("65,69,72")
        );
    }
}
