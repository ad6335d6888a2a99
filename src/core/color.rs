use serde::{Deserialize, Serialize};

use crate::{
    core::Keyframe,
    error::{ReaderError, Result},
};

/// An animatable RGBA color; each channel is a keyframe over 0-255
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Color {
    pub red: Keyframe,
    pub green: Keyframe,
    pub blue: Keyframe,
    pub alpha: Keyframe,
}

impl Default for Color {
    fn default() -> Self {
        Self::from_rgba(0, 0, 0, 255)
    }
}

impl Color {
    pub fn from_rgba(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self {
            red: Keyframe::new(r as f64),
            green: Keyframe::new(g as f64),
            blue: Keyframe::new(b as f64),
            alpha: Keyframe::new(a as f64),
        }
    }

    pub fn from_keyframes(red: Keyframe, green: Keyframe, blue: Keyframe, alpha: Keyframe) -> Self {
        Self { red, green, blue, alpha }
    }

    /// Parse `#rgb`, `#rrggbb`, `#aarrggbb` or a handful of color names
    pub fn parse(value: &str) -> Result<Self> {
        let [r, g, b, a] = parse_rgba(value)?;
        Ok(Self::from_rgba(r, g, b, a))
    }

    /// Channel values at a frame, clamped to 0-255
    pub fn get_rgba(&self, frame: i64) -> [u8; 4] {
        let channel = |kf: &Keyframe| kf.get_int(frame).clamp(0, 255) as u8;
        [channel(&self.red), channel(&self.green), channel(&self.blue), channel(&self.alpha)]
    }

    /// `#rrggbb` at a frame
    pub fn get_color_hex(&self, frame: i64) -> String {
        let [r, g, b, _] = self.get_rgba(frame);
        format!("#{:02x}{:02x}{:02x}", r, g, b)
    }

    /// Perceptually weighted distance between two RGB colors
    pub fn distance(a: [u8; 3], b: [u8; 3]) -> i64 {
        let rmean = (a[0] as i64 + b[0] as i64) / 2;
        let r = a[0] as i64 - b[0] as i64;
        let g = a[1] as i64 - b[1] as i64;
        let bl = a[2] as i64 - b[2] as i64;
        let sum = (((512 + rmean) * r * r) >> 8) + 4 * g * g + (((767 - rmean) * bl * bl) >> 8);
        (sum as f64).sqrt() as i64
    }
}

/// Parse a CSS-ish color string into `[r, g, b, a]`
pub fn parse_rgba(value: &str) -> Result<[u8; 4]> {
    let invalid = || ReaderError::InvalidFormat { details: format!("invalid color '{}'", value) };
    let trimmed = value.trim();

    let named = match trimmed.to_ascii_lowercase().as_str() {
        "black" => Some([0, 0, 0, 255]),
        "white" => Some([255, 255, 255, 255]),
        "red" => Some([255, 0, 0, 255]),
        "green" => Some([0, 128, 0, 255]),
        "lime" => Some([0, 255, 0, 255]),
        "blue" => Some([0, 0, 255, 255]),
        "yellow" => Some([255, 255, 0, 255]),
        "cyan" | "aqua" => Some([0, 255, 255, 255]),
        "magenta" | "fuchsia" => Some([255, 0, 255, 255]),
        "gray" | "grey" => Some([128, 128, 128, 255]),
        "orange" => Some([255, 165, 0, 255]),
        "transparent" => Some([0, 0, 0, 0]),
        _ => None,
    };
    if let Some(rgba) = named {
        return Ok(rgba);
    }

    let hex = trimmed.strip_prefix('#').ok_or_else(invalid)?;
    if !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(invalid().into());
    }
    let byte = |s: &str| u8::from_str_radix(s, 16).map_err(|_| invalid());

    match hex.len() {
        3 => {
            let nibble = |i: usize| byte(&hex[i..i + 1]).map(|v| v * 17);
            Ok([nibble(0)?, nibble(1)?, nibble(2)?, 255])
        }
        6 => Ok([byte(&hex[0..2])?, byte(&hex[2..4])?, byte(&hex[4..6])?, 255]),
        8 => Ok([byte(&hex[2..4])?, byte(&hex[4..6])?, byte(&hex[6..8])?, byte(&hex[0..2])?]),
        _ => Err(invalid().into()),
    }
}
