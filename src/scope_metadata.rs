use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, LazyLock};

use onig::Regex;

use crate::grammars::regex::escape_regex;
use crate::metadata::{StandardTokenType, TokenMetadata};
use crate::themes::{ThemeProvider, ThemeTrieElementRule};

static STANDARD_TOKEN_TYPE_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(comment|string|regex)\b").expect("Invalid token type regex")
});

/// What we know about a scope name regardless of where it appears.
#[derive(Debug, Clone, PartialEq)]
pub struct ScopeMetadata {
    pub scope_name: String,
    pub language_id: u8,
    pub token_type: StandardTokenType,
    /// Theme rules for that scope, most specific first.
    /// `None` for the metadata of a missing scope, which doesn't change anything when merged.
    pub theme_data: Option<Arc<[ThemeTrieElementRule]>>,
}

impl ScopeMetadata {
    fn null() -> Self {
        Self {
            scope_name: String::new(),
            language_id: 0,
            token_type: StandardTokenType::Other,
            theme_data: None,
        }
    }
}

fn to_standard_token_type(scope_name: &str) -> StandardTokenType {
    let Some(captures) = STANDARD_TOKEN_TYPE_REGEX.captures(scope_name) else {
        return StandardTokenType::Other;
    };
    match captures.at(1) {
        Some("comment") => StandardTokenType::Comment,
        Some("string") => StandardTokenType::String,
        Some("regex") => StandardTokenType::RegEx,
        _ => StandardTokenType::Other,
    }
}

/// Resolves and caches the [`ScopeMetadata`] of scope names for one theme.
///
/// A new provider is created whenever the theme changes.
pub(crate) struct ScopeMetadataProvider {
    initial_language: u8,
    theme: Arc<dyn ThemeProvider>,
    default_metadata: TokenMetadata,
    embedded_languages: HashMap<String, u8>,
    /// Matches the longest registered embedded language scope a scope name starts with
    embedded_languages_regex: Option<Regex>,
    cache: papaya::HashMap<String, Arc<ScopeMetadata>>,
}

impl ScopeMetadataProvider {
    pub fn new(
        initial_language: u8,
        theme: Arc<dyn ThemeProvider>,
        embedded_languages: &HashMap<String, u8>,
    ) -> Self {
        let mut embedded = HashMap::new();
        for (scope, language) in embedded_languages {
            if *language == 0 {
                log::warn!("Ignoring embedded language {scope} registered with the reserved id 0");
                continue;
            }
            embedded.insert(scope.clone(), *language);
        }

        let embedded_languages_regex = if embedded.is_empty() {
            None
        } else {
            let mut escaped: Vec<String> = embedded.keys().map(|s| escape_regex(s)).collect();
            // reverse order puts `a.b` before `a`
            escaped.sort();
            escaped.reverse();
            Regex::new(&format!(r"^(({}))($|\.)", escaped.join(")|(")))
                .inspect_err(|e| log::warn!("Invalid embedded languages: {e}"))
                .ok()
        };

        let defaults = theme.defaults();
        let default_metadata = TokenMetadata::default().set(
            initial_language,
            StandardTokenType::Other,
            defaults.font_style,
            defaults.foreground,
            defaults.background,
        );

        Self {
            initial_language,
            theme,
            default_metadata,
            embedded_languages: embedded,
            embedded_languages_regex,
            cache: papaya::HashMap::new(),
        }
    }

    /// The metadata everything starts from: the initial language and the theme defaults
    pub fn default_metadata(&self) -> TokenMetadata {
        self.default_metadata
    }

    pub fn lookup(&self, scope_name: Option<&str>) -> Arc<ScopeMetadata> {
        let Some(scope_name) = scope_name else {
            return Arc::new(ScopeMetadata::null());
        };
        let cache = self.cache.pin();
        if let Some(metadata) = cache.get(scope_name) {
            return metadata.clone();
        }
        let metadata = Arc::new(ScopeMetadata {
            scope_name: scope_name.to_string(),
            language_id: self.scope_to_language(scope_name),
            token_type: to_standard_token_type(scope_name),
            theme_data: Some(self.theme.theme_match(scope_name)),
        });
        cache.insert(scope_name.to_string(), metadata.clone());
        metadata
    }

    fn scope_to_language(&self, scope_name: &str) -> u8 {
        let Some(regex) = &self.embedded_languages_regex else {
            return 0;
        };
        regex
            .captures(scope_name)
            .and_then(|c| c.at(1))
            .and_then(|s| self.embedded_languages.get(s).copied())
            .unwrap_or(0)
    }
}

impl fmt::Debug for ScopeMetadataProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScopeMetadataProvider")
            .field("initial_language", &self.initial_language)
            .field("default_metadata", &self.default_metadata)
            .field("embedded_languages", &self.embedded_languages)
            .finish()
    }
}
