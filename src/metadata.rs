//! The packed 32-bit token metadata used by binary tokens.
//!
//! ```text
//!     3322 2222 2222 1111 1111 1100 0000 0000
//!     1098 7654 3210 9876 5432 1098 7654 3210
//!     bbbb bbbb bfff ffff ffFF FTTT LLLL LLLL
//! ```
//! - L = language id (8 bits)
//! - T = standard token type (3 bits)
//! - F = font style (3 bits)
//! - f = foreground color id (9 bits)
//! - b = background color id (9 bits)

use std::fmt;

use crate::themes::FontStyle;

const LANGUAGE_ID_MASK: u32 = 0b0000_0000_0000_0000_0000_0000_1111_1111;
const TOKEN_TYPE_MASK: u32 = 0b0000_0000_0000_0000_0000_0111_0000_0000;
const FONT_STYLE_MASK: u32 = 0b0000_0000_0000_0000_0011_1000_0000_0000;
const FOREGROUND_MASK: u32 = 0b0000_0000_0111_1111_1100_0000_0000_0000;
const BACKGROUND_MASK: u32 = 0b1111_1111_1000_0000_0000_0000_0000_0000;

const LANGUAGE_ID_OFFSET: u32 = 0;
const TOKEN_TYPE_OFFSET: u32 = 8;
const FONT_STYLE_OFFSET: u32 = 11;
const FOREGROUND_OFFSET: u32 = 14;
const BACKGROUND_OFFSET: u32 = 23;

/// Coarse classification of a token derived from its scope names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum StandardTokenType {
    #[default]
    Other = 0,
    Comment = 1,
    String = 2,
    RegEx = 4,
}

impl StandardTokenType {
    fn from_bits(bits: u32) -> Self {
        match bits {
            1 => Self::Comment,
            2 => Self::String,
            4 => Self::RegEx,
            _ => Self::Other,
        }
    }
}

/// A language id, token type, font style and two color ids packed in a `u32`.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct TokenMetadata(u32);

impl TokenMetadata {
    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub fn language_id(self) -> u8 {
        ((self.0 & LANGUAGE_ID_MASK) >> LANGUAGE_ID_OFFSET) as u8
    }

    pub fn token_type(self) -> StandardTokenType {
        StandardTokenType::from_bits((self.0 & TOKEN_TYPE_MASK) >> TOKEN_TYPE_OFFSET)
    }

    pub fn font_style(self) -> FontStyle {
        FontStyle::from_bits(((self.0 & FONT_STYLE_MASK) >> FONT_STYLE_OFFSET) as u8)
    }

    pub fn foreground(self) -> u16 {
        ((self.0 & FOREGROUND_MASK) >> FOREGROUND_OFFSET) as u16
    }

    pub fn background(self) -> u16 {
        ((self.0 & BACKGROUND_MASK) >> BACKGROUND_OFFSET) as u16
    }

    /// Returns a copy with the given fields overwritten.
    ///
    /// A field keeps its previous value when the incoming one is "unset":
    /// language id 0, `StandardTokenType::Other`, `None` font style or color id 0.
    pub fn set(
        self,
        language_id: u8,
        token_type: StandardTokenType,
        font_style: Option<FontStyle>,
        foreground: u16,
        background: u16,
    ) -> Self {
        let mut language = self.language_id() as u32;
        let mut kind = (self.0 & TOKEN_TYPE_MASK) >> TOKEN_TYPE_OFFSET;
        let mut style = self.font_style().bits() as u32;
        let mut fg = self.foreground() as u32;
        let mut bg = self.background() as u32;

        if language_id != 0 {
            language = language_id as u32;
        }
        if token_type != StandardTokenType::Other {
            kind = token_type as u32;
        }
        if let Some(font_style) = font_style {
            style = font_style.bits() as u32;
        }
        if foreground != 0 {
            fg = foreground as u32;
        }
        if background != 0 {
            bg = background as u32;
        }

        Self(
            ((language << LANGUAGE_ID_OFFSET) & LANGUAGE_ID_MASK)
                | ((kind << TOKEN_TYPE_OFFSET) & TOKEN_TYPE_MASK)
                | ((style << FONT_STYLE_OFFSET) & FONT_STYLE_MASK)
                | ((fg << FOREGROUND_OFFSET) & FOREGROUND_MASK)
                | ((bg << BACKGROUND_OFFSET) & BACKGROUND_MASK),
        )
    }
}

impl fmt::Debug for TokenMetadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenMetadata")
            .field("language_id", &self.language_id())
            .field("token_type", &self.token_type())
            .field("font_style", &self.font_style().bits())
            .field("foreground", &self.foreground())
            .field("background", &self.background())
            .finish()
    }
}
