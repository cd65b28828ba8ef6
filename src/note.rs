/// Note names used when converting a MIDI number back to text.
pub const CHROMATIC: [&str; 12] = [
    "C", "Db", "D", "Eb", "E", "F", "Gb", "G", "Ab", "A", "Bb", "B",
];

/// Lowest and highest keys of an 88-key piano.
pub const PIANO_LOW: u8 = 21;
pub const PIANO_HIGH: u8 = 108;

/// Position of each natural on the circle of fifths and its octave correction.
fn base(letter: char) -> Option<(i32, i32)> {
    match letter.to_ascii_uppercase() {
        'C' => Some((0, 0)),
        'D' => Some((2, -1)),
        'E' => Some((4, -2)),
        'F' => Some((-1, 1)),
        'G' => Some((1, 0)),
        'A' => Some((3, -1)),
        'B' => Some((5, -2)),
        _ => None,
    }
}

/// Converts a MIDI note number to its name, e.g. 60 -> "C4".
pub fn note_name(pitch: u8) -> String {
    let name = CHROMATIC[(pitch % 12) as usize];
    let octave = (pitch / 12) as i32 - 1;
    format!("{}{}", name, octave)
}

/// Parses a note name such as "C4", "F#3", "Bbb2", "Cx4" or "A4/8" into a
/// MIDI number. Plain numbers between 1 and 127 are passed through.
///
/// A name without an octave ("C#") has no MIDI number.
pub fn parse_note(text: &str) -> Option<u8> {
    if let Ok(number) = text.trim().parse::<u8>() {
        if (1..128).contains(&number) {
            return Some(number);
        }
    }

    let mut chars = text.chars().peekable();
    let (fifths_base, octave_base) = base(chars.next()?)?;

    // Accidentals must be a run of a single kind
    let mut alteration = 0i32;
    if let Some(&first) = chars.peek() {
        if matches!(first, '#' | 'b' | 'x') {
            while chars.peek() == Some(&first) {
                chars.next();
                alteration += match first {
                    '#' => 1,
                    'b' => -1,
                    _ => 2,
                };
            }
        }
    }

    let mut octave = String::new();
    if chars.peek() == Some(&'-') {
        octave.push('-');
        chars.next();
    }
    while let Some(c) = chars.peek().copied().filter(char::is_ascii_digit) {
        octave.push(c);
        chars.next();
    }

    // Optional duration suffix, ignored
    if chars.peek() == Some(&'/') {
        chars.next();
        let mut digits = 0;
        while chars.peek().is_some_and(char::is_ascii_digit) {
            chars.next();
            digits += 1;
        }
        if digits == 0 {
            return None;
        }
    }

    if !chars.all(char::is_whitespace) {
        return None;
    }
    if octave.is_empty() {
        return None;
    }
    let octave: i32 = octave.parse().ok()?;

    let fifths = fifths_base + 7 * alteration;
    let octave = octave + octave_base - 4 * alteration;
    let midi = fifths * 7 + octave * 12 + 12;
    u8::try_from(midi).ok().filter(|m| *m < 128)
}

/// Whether the pitch is a black key.
pub fn is_black(pitch: u8) -> bool {
    matches!(pitch % 12, 1 | 3 | 6 | 8 | 10)
}

/// Number of white keys strictly below `pitch`.
pub fn white_keys_before(pitch: u8) -> u8 {
    let octaves = pitch / 12;
    let within = match pitch % 12 {
        0 => 0,
        1 | 2 => 1,
        3 | 4 => 2,
        5 => 3,
        6 | 7 => 4,
        8 | 9 => 5,
        _ => 6,
    };
    octaves * 7 + within
}

/// Converts a MIDI note to frequency
pub fn frequency(pitch: u8) -> f32 {
    440.0 * (2.0_f32).powf((pitch as f32 - 69.0) / 12.0)
}

/// Shifts a pitch by whole octaves, `None` when it leaves the MIDI range.
pub fn transpose(pitch: u8, octaves: i8) -> Option<u8> {
    let shifted = pitch as i32 + octaves as i32 * 12;
    u8::try_from(shifted).ok().filter(|p| *p < 128)
}
