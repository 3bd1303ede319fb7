mod color;
mod compiled;
mod font_style;
mod raw;
mod trie;

pub use color::{Color, ColorMap};
pub use compiled::{Theme, ThemeProvider};
pub use font_style::FontStyle;
pub use raw::{EditorColors, RawTheme, RawThemeSetting, RawThemeStyle};
pub use trie::ThemeTrieElementRule;
