// The "utils" module collects small helpers shared by the model and the encoders:
// colors, well labels, time units and the rendering of C array literals.
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Indentation used inside multi-line array literals.
pub const INDENT: &str = "    ";

/// A display color, written as `#rrggbb` in save files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Rgb(pub u8, pub u8, pub u8);

impl FromStr for Rgb {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let hex = s.trim().trim_start_matches('#');
        let bad = || Error::session(format!("invalid color {:?}, expected #rrggbb", s));
        if hex.len() != 6 || !hex.is_ascii() {
            return Err(bad());
        }
        let channel = |i: usize| u8::from_str_radix(&hex[i..i + 2], 16).map_err(|_| bad());
        Ok(Rgb(channel(0)?, channel(2)?, channel(4)?))
    }
}

impl TryFrom<String> for Rgb {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<Rgb> for String {
    fn from(c: Rgb) -> String {
        c.to_string()
    }
}

impl fmt::Display for Rgb {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "#{:02x}{:02x}{:02x}", self.0, self.1, self.2)
    }
}

// Cycled through for newly created Steps
const STEP_PALETTE: [Rgb; 10] = [
    Rgb(0x1f, 0x77, 0xb4),
    Rgb(0xff, 0x7f, 0x0e),
    Rgb(0x2c, 0xa0, 0x2c),
    Rgb(0xd6, 0x27, 0x28),
    Rgb(0x94, 0x67, 0xbd),
    Rgb(0x8c, 0x56, 0x4b),
    Rgb(0xe3, 0x77, 0xc2),
    Rgb(0x7f, 0x7f, 0x7f),
    Rgb(0xbc, 0xbd, 0x22),
    Rgb(0x17, 0xbe, 0xcf),
];

pub fn palette_color(n: u32) -> Rgb {
    STEP_PALETTE[n as usize % STEP_PALETTE.len()]
}

/// Unit in which a time value is displayed. Times are always stored in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum TimeUnit {
    #[default]
    #[serde(rename = "ms")]
    Millis,
    #[serde(rename = "s")]
    Seconds,
    #[serde(rename = "min")]
    Minutes,
    #[serde(rename = "h")]
    Hours,
    #[serde(rename = "d")]
    Days,
}

impl TimeUnit {
    /// Milliseconds per unit.
    pub fn factor(self) -> u64 {
        match self {
            TimeUnit::Millis => 1,
            TimeUnit::Seconds => 1_000,
            TimeUnit::Minutes => 60_000,
            TimeUnit::Hours => 3_600_000,
            TimeUnit::Days => 86_400_000,
        }
    }

    pub fn symbol(self) -> &'static str {
        match self {
            TimeUnit::Millis => "ms",
            TimeUnit::Seconds => "s",
            TimeUnit::Minutes => "min",
            TimeUnit::Hours => "h",
            TimeUnit::Days => "d",
        }
    }

    /// Renders a millisecond value in this unit, e.g. `1.5 min`.
    pub fn display(self, millis: u64) -> String {
        match self {
            TimeUnit::Millis => format!("{} ms", millis),
            unit => format!("{} {}", millis as f64 / unit.factor() as f64, unit.symbol()),
        }
    }
}

/// Label of a position in a grid of `ncols` columns, `A1` being the top left.
///
/// # Examples
///
/// ```
/// use optocompiler_backend::utils::well_label;
///
/// assert_eq!(well_label(0, 12), "A1");
/// assert_eq!(well_label(13, 12), "B2");
/// assert_eq!(well_label(23, 6), "D6");
/// ```
pub fn well_label(idx: usize, ncols: usize) -> String {
    let row = (b'A' + (idx / ncols) as u8) as char;
    format!("{}{}", row, idx % ncols + 1)
}

/// Hexadecimal byte literal as found in the generated sketch (`0x0`, `0x64`).
pub fn hex_byte(byte: u8) -> String {
    format!("{:#x}", byte)
}

/// Single-line C array literal: `{ a, b, c }`.
pub fn array_literal<T: fmt::Display>(elements: &[T]) -> String {
    if elements.is_empty() {
        return "{ }".to_string();
    }
    let joined = elements
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join(", ");
    format!("{{ {} }}", joined)
}

/// Multi-line C array literal with `per_line` elements on each indented line.
///
/// With `pad`, elements are right-justified to the widest element so that columns line up.
///
/// # Examples
///
/// ```
/// use optocompiler_backend::utils::block_array_literal;
///
/// let rendered = block_array_literal(&[1, 20, 300], 2, true);
/// assert_eq!(rendered, "{\n      1,  20,\n    300\n}");
/// ```
pub fn block_array_literal<T: fmt::Display>(elements: &[T], per_line: usize, pad: bool) -> String {
    let mut rendered: Vec<String> = elements.iter().map(|e| e.to_string()).collect();
    if pad {
        let width = rendered.iter().map(|s| s.len()).max().unwrap_or(0);
        rendered = rendered
            .into_iter()
            .map(|s| format!("{:>width$}", s, width = width))
            .collect();
    }
    let lines: Vec<String> = rendered
        .chunks(per_line.max(1))
        .map(|chunk| format!("{}{}", INDENT, chunk.join(", ")))
        .collect();
    if lines.is_empty() {
        return "{\n}".to_string();
    }
    format!("{{\n{}\n}}", lines.join(",\n"))
}
