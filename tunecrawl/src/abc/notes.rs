//! MIDI pitch derivation from an ABC tune body.
//!
//! Note letters map onto the C-major scale around middle C; case selects
//! the octave, `'` and `,` shift further, `^` `_` `=` are accidentals.
//! Everything that is not a note (bar lines, durations, decorations,
//! chord symbols, inline fields, lyrics) is skipped.

/// MIDI value of middle C; `C` in ABC.
const MIDDLE_C: i32 = 60;

/// Semitone offsets of the seven note letters relative to C.
fn letter_offset(letter: char) -> Option<i32> {
    match letter.to_ascii_uppercase() {
        'C' => Some(0),
        'D' => Some(2),
        'E' => Some(4),
        'F' => Some(5),
        'G' => Some(7),
        'A' => Some(9),
        'B' => Some(11),
        _ => None,
    }
}

/// Extracts the MIDI pitch sequence of a tune body.
pub fn pitches_from_body(body: &str) -> Vec<i32> {
    let mut pitches = Vec::new();

    for line in body.lines() {
        let line = line.trim();
        // Inline information fields and lyrics (`w:`) are not melody.
        if line.len() >= 2 && line.as_bytes()[1] == b':' && line.as_bytes()[0].is_ascii_alphabetic()
        {
            continue;
        }
        // Strip trailing comments.
        let line = line.split('%').next().unwrap_or("");

        let mut accidental: i32 = 0;
        let mut in_quote = false;
        let mut in_decoration = false;
        let mut in_inline_field = false;

        let mut chars = line.chars().peekable();
        while let Some(c) = chars.next() {
            if in_quote {
                in_quote = c != '"';
                continue;
            }
            if in_decoration {
                in_decoration = c != '!';
                continue;
            }
            if in_inline_field {
                in_inline_field = c != ']';
                continue;
            }
            match c {
                '"' => in_quote = true,
                '!' => in_decoration = true,
                '[' => {
                    // `[K:...]` style inline fields are skipped; chord
                    // brackets are transparent so chord notes still count.
                    if chars
                        .peek()
                        .map(|n| n.is_ascii_alphabetic())
                        .unwrap_or(false)
                    {
                        let mut lookahead = chars.clone();
                        lookahead.next();
                        if lookahead.peek() == Some(&':') {
                            in_inline_field = true;
                        }
                    }
                }
                '^' => accidental += 1,
                '_' => accidental -= 1,
                '=' => accidental = 0,
                _ => {
                    if let Some(offset) = letter_offset(c) {
                        let mut pitch = MIDDLE_C + offset + accidental;
                        if c.is_ascii_lowercase() {
                            pitch += 12;
                        }
                        while let Some(&mark) = chars.peek() {
                            match mark {
                                '\'' => {
                                    pitch += 12;
                                    chars.next();
                                }
                                ',' => {
                                    pitch -= 12;
                                    chars.next();
                                }
                                _ => break,
                            }
                        }
                        pitches.push(pitch);
                        accidental = 0;
                    } else if !matches!(c, '/' | '<' | '>' | '-' | '~' | '.') {
                        // Any other token boundary drops a pending accidental.
                        accidental = 0;
                    }
                }
            }
        }
    }
    pitches
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_c_major_scale() {
        assert_eq!(
            pitches_from_body("CDEFGAB"),
            vec![60, 62, 64, 65, 67, 69, 71]
        );
    }

    #[test]
    fn test_lowercase_is_octave_up() {
        assert_eq!(pitches_from_body("Cc"), vec![60, 72]);
    }

    #[test]
    fn test_octave_marks() {
        assert_eq!(pitches_from_body("C,"), vec![48]);
        assert_eq!(pitches_from_body("c'"), vec![84]);
        assert_eq!(pitches_from_body("C,,"), vec![36]);
    }

    #[test]
    fn test_accidentals() {
        assert_eq!(pitches_from_body("^C"), vec![61]);
        assert_eq!(pitches_from_body("_B"), vec![70]);
        assert_eq!(pitches_from_body("^^F"), vec![67]);
        assert_eq!(pitches_from_body("=C"), vec![60]);
    }

    #[test]
    fn test_bars_and_durations_are_ignored() {
        assert_eq!(pitches_from_body("G2 A2 | B4 :|"), vec![67, 69, 71]);
    }

    #[test]
    fn test_chord_symbols_are_ignored() {
        assert_eq!(pitches_from_body("\"Gmaj\" G A B"), vec![67, 69, 71]);
    }

    #[test]
    fn test_decorations_are_ignored() {
        assert_eq!(pitches_from_body("!trill! G"), vec![67]);
    }

    #[test]
    fn test_inline_fields_are_ignored() {
        assert_eq!(pitches_from_body("G [K:D] A"), vec![67, 69]);
    }

    #[test]
    fn test_lyric_lines_are_ignored() {
        assert_eq!(pitches_from_body("GAB\nw: fa la la"), vec![67, 69, 71]);
    }

    #[test]
    fn test_empty_body() {
        assert!(pitches_from_body("").is_empty());
    }
}
