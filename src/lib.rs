mod error;
mod grammar;
mod grammars;
mod metadata;
mod registry;
mod scope;
mod scope_metadata;
mod themes;
mod tokenizer;

#[cfg(test)]
mod test_utils;

pub use error::Error;
pub use grammar::{Grammar, GrammarOptions, GrammarRepository, TokenizeLineResult, TokenizeLineResult2};
pub use grammars::{
    InjectionPrecedence, InjectionSelector, RawCaptures, RawGrammar, RawRule, RuleId,
    SelectorMatcher, parse_injection_selector,
};
pub use metadata::{StandardTokenType, TokenMetadata};
pub use registry::{GrammarLocator, Registry};
pub use scope::ScopeList;
pub use scope_metadata::ScopeMetadata;
pub use themes::{
    Color, ColorMap, EditorColors, FontStyle, RawTheme, RawThemeSetting, RawThemeStyle, Theme,
    ThemeProvider, ThemeTrieElementRule,
};
pub use tokenizer::{StateStack, Token};
