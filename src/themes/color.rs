use std::collections::HashMap;

use crate::error::{Error, TintaResult};

/// RGBA color with 8-bit components
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

fn parse_hex_component(hex: &str, original: &str) -> TintaResult<u8> {
    u8::from_str_radix(hex, 16).map_err(|_| Error::InvalidHexColor {
        value: original.to_string(),
        reason: format!("invalid hex component '{}'", hex),
    })
}

impl Color {
    /// Outputs the upper-cased hex value for that colour, alpha only when not opaque.
    pub fn as_hex(&self) -> String {
        if self.a < 255 {
            format!("#{:02X}{:02X}{:02X}{:02X}", self.r, self.g, self.b, self.a)
        } else {
            format!("#{:02X}{:02X}{:02X}", self.r, self.g, self.b)
        }
    }

    /// Creates a Color from a `#rgb`, `#rgba`, `#rrggbb` or `#rrggbbaa` string.
    ///
    /// Errors if the string is not a valid hex colour.
    pub fn from_hex(hex: &str) -> TintaResult<Self> {
        let original = hex;
        let Some(hex) = hex.strip_prefix('#') else {
            return Err(Error::InvalidHexColor {
                value: original.to_string(),
                reason: "missing leading '#'".to_string(),
            });
        };
        if !hex.is_ascii() {
            return Err(Error::InvalidHexColor {
                value: original.to_string(),
                reason: "non-ascii characters".to_string(),
            });
        }

        match hex.len() {
            3 | 4 => {
                let r = parse_hex_component(&hex[0..1], original)?;
                let g = parse_hex_component(&hex[1..2], original)?;
                let b = parse_hex_component(&hex[2..3], original)?;
                let a = if hex.len() == 4 {
                    parse_hex_component(&hex[3..4], original)?
                } else {
                    15
                };
                Ok(Color {
                    r: r * 17,
                    g: g * 17,
                    b: b * 17,
                    a: a * 17,
                })
            }
            6 | 8 => {
                let r = parse_hex_component(&hex[0..2], original)?;
                let g = parse_hex_component(&hex[2..4], original)?;
                let b = parse_hex_component(&hex[4..6], original)?;
                let a = if hex.len() == 8 {
                    parse_hex_component(&hex[6..8], original)?
                } else {
                    255
                };
                Ok(Color { r, g, b, a })
            }
            _ => Err(Error::InvalidHexColor {
                value: original.to_string(),
                reason: format!("invalid length {}", hex.len()),
            }),
        }
    }
}

/// Assigns small integer ids to the colors used by a theme.
///
/// Ids start at 1: 0 is reserved for "no color set" in packed metadata.
#[derive(Debug, Clone, Default)]
pub struct ColorMap {
    ids: HashMap<String, u16>,
    // index 0 is a placeholder so that `colors[id]` works directly
    colors: Vec<String>,
}

impl ColorMap {
    pub fn new() -> Self {
        Self {
            ids: HashMap::new(),
            colors: vec![String::new()],
        }
    }

    /// Returns the id of that color, allocating one on first sight.
    /// Colors are compared case-insensitively.
    pub fn id_for(&mut self, color: &str) -> u16 {
        let color = color.to_uppercase();
        if let Some(id) = self.ids.get(&color) {
            return *id;
        }
        let id = self.colors.len() as u16;
        self.colors.push(color.clone());
        self.ids.insert(color, id);
        id
    }

    /// The color registered for that id, if any. Id 0 is never a color.
    pub fn color(&self, id: u16) -> Option<&str> {
        if id == 0 {
            return None;
        }
        self.colors.get(id as usize).map(|c| c.as_str())
    }

    /// All colors indexed by their id, with an empty placeholder at index 0.
    pub fn colors(&self) -> &[String] {
        &self.colors
    }

    pub fn len(&self) -> usize {
        self.colors.len() - 1
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn can_parse_hex_colors() {
        let inputs = vec![
            ("#F00", (255, 0, 0, 255)),
            ("#369", (51, 102, 153, 255)),
            ("#F008", (255, 0, 0, 136)),
            ("#FF0000", (255, 0, 0, 255)),
            ("#abcdef", (171, 205, 239, 255)),
            ("#00000080", (0, 0, 0, 128)),
        ];

        for (input, (r, g, b, a)) in inputs {
            assert_eq!(
                Color::from_hex(input).unwrap(),
                Color { r, g, b, a },
                "{input}"
            );
        }
    }

    #[test]
    fn rejects_invalid_hex_colors() {
        for input in ["F00", "#", "#12", "#12345", "#GGGGGG", "#ééé", "white"] {
            assert!(Color::from_hex(input).is_err(), "{input}");
        }
    }

    #[test]
    fn hex_output_is_upper_cased() {
        assert_eq!(Color::from_hex("#abcdef").unwrap().as_hex(), "#ABCDEF");
        assert_eq!(Color::from_hex("#abcdef80").unwrap().as_hex(), "#ABCDEF80");
    }

    #[test]
    fn color_map_ids_are_one_based_and_stable() {
        let mut map = ColorMap::new();
        assert!(map.is_empty());
        assert_eq!(map.id_for("#ff0000"), 1);
        assert_eq!(map.id_for("#00FF00"), 2);
        assert_eq!(map.id_for("#FF0000"), 1);
        assert_eq!(map.len(), 2);
        assert_eq!(map.color(0), None);
        assert_eq!(map.color(1), Some("#FF0000"));
        assert_eq!(map.colors(), &["", "#FF0000", "#00FF00"]);
    }
}
