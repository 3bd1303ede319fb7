/// A set of font style flags as stored in packed token metadata (3 bits).
///
/// The empty set is a real value ("explicitly no style"); the absence of a
/// style in a theme rule is modelled as `Option<FontStyle>::None` instead.
#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct FontStyle {
    bits: u8,
}

impl FontStyle {
    /// Italic font style
    pub const ITALIC: Self = Self { bits: 1 };
    /// Bold font style
    pub const BOLD: Self = Self { bits: 2 };
    /// Underline font style
    pub const UNDERLINE: Self = Self { bits: 4 };

    /// Returns an empty set of flags
    pub const fn empty() -> Self {
        Self { bits: 0 }
    }

    /// Builds a style from raw bits, ignoring anything above the 3 known flags
    pub const fn from_bits(bits: u8) -> Self {
        Self { bits: bits & 0b111 }
    }

    /// The raw bits of this style
    pub const fn bits(&self) -> u8 {
        self.bits
    }

    /// Returns `true` if no flags are currently stored
    pub const fn is_empty(&self) -> bool {
        self.bits == 0
    }

    /// Returns `true` if all of the flags in `other` are contained within `self`
    pub const fn contains(&self, other: Self) -> bool {
        (self.bits & other.bits) == other.bits
    }

    /// Parses a theme `fontStyle` value such as `"bold italic"`.
    /// Unknown words are ignored and an empty string means no style.
    pub fn parse(font_style_str: &str) -> Self {
        let mut font_style = Self::empty();
        for segment in font_style_str.split(' ') {
            match segment {
                "italic" => font_style.insert(FontStyle::ITALIC),
                "bold" => font_style.insert(FontStyle::BOLD),
                "underline" => font_style.insert(FontStyle::UNDERLINE),
                _ => (),
            }
        }
        font_style
    }

    /// Inserts the specified flags in-place
    pub fn insert(&mut self, other: Self) {
        self.bits |= other.bits;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_theme_font_styles() {
        let style = FontStyle::parse("bold italic");
        assert!(style.contains(FontStyle::BOLD));
        assert!(style.contains(FontStyle::ITALIC));
        assert!(!style.contains(FontStyle::UNDERLINE));
        assert_eq!(style.bits(), 3);

        assert!(FontStyle::parse("").is_empty());
        // only whole words count
        assert!(FontStyle::parse("bolder").is_empty());
        assert_eq!(FontStyle::parse("underline").bits(), 4);
    }
}
