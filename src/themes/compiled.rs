use std::fmt;
use std::path::Path;
use std::sync::Arc;

use crate::error::TintaResult;
use crate::themes::FontStyle;
use crate::themes::color::ColorMap;
use crate::themes::raw::{ParsedThemeRule, RawTheme};
use crate::themes::trie::{ThemeTrieElement, ThemeTrieElementRule, cmp_scope_lists};

const DEFAULT_FOREGROUND: &str = "#000000";
const DEFAULT_BACKGROUND: &str = "#ffffff";

/// What the scope metadata resolver needs from a theme.
pub trait ThemeProvider: Send + Sync {
    /// Candidate rules for that scope name, most specific first.
    fn theme_match(&self, scope_name: &str) -> Arc<[ThemeTrieElementRule]>;

    /// The global style: never has parent scopes and always has both colors set.
    fn defaults(&self) -> ThemeTrieElementRule;
}

/// A theme resolved into a scope trie, ready to style tokens.
pub struct Theme {
    name: Option<String>,
    color_map: ColorMap,
    root: ThemeTrieElement,
    defaults: ThemeTrieElementRule,
    cache: papaya::HashMap<String, Arc<[ThemeTrieElementRule]>>,
}

impl Theme {
    pub fn from_raw(raw: &RawTheme) -> Self {
        let mut theme = Self::from_parsed_rules(raw.parse());
        theme.name = raw.name.clone();
        theme
    }

    pub fn from_json(json: &str) -> TintaResult<Self> {
        Ok(Self::from_raw(&RawTheme::from_json(json)?))
    }

    pub fn load_from_file(path: impl AsRef<Path>) -> TintaResult<Self> {
        Ok(Self::from_raw(&RawTheme::load_from_file(path)?))
    }

    fn from_parsed_rules(mut rules: Vec<ParsedThemeRule>) -> Self {
        rules.sort_by(|a, b| {
            a.scope
                .cmp(&b.scope)
                .then_with(|| cmp_scope_lists(a.parent_scopes.as_deref(), b.parent_scopes.as_deref()))
                .then_with(|| a.index.cmp(&b.index))
        });

        let mut font_style = FontStyle::empty();
        let mut foreground = DEFAULT_FOREGROUND.to_string();
        let mut background = DEFAULT_BACKGROUND.to_string();

        // empty scopes sort first, they are the global defaults
        let split = rules.iter().take_while(|r| r.scope.is_empty()).count();
        for rule in rules.drain(..split) {
            if let Some(style) = rule.font_style {
                font_style = style;
            }
            if let Some(fg) = rule.foreground {
                foreground = fg;
            }
            if let Some(bg) = rule.background {
                background = bg;
            }
        }

        let mut color_map = ColorMap::new();
        let defaults = ThemeTrieElementRule::new(
            0,
            None,
            Some(font_style),
            color_map.id_for(&foreground),
            color_map.id_for(&background),
        );

        let mut root = ThemeTrieElement::new(ThemeTrieElementRule::new(0, None, None, 0, 0));
        for rule in rules {
            let fg = rule.foreground.as_deref().map_or(0, |c| color_map.id_for(c));
            let bg = rule.background.as_deref().map_or(0, |c| color_map.id_for(c));
            root.insert(
                0,
                &rule.scope,
                rule.parent_scopes.as_deref(),
                rule.font_style,
                fg,
                bg,
            );
        }

        Self {
            name: None,
            color_map,
            root,
            defaults,
            cache: papaya::HashMap::new(),
        }
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn color_map(&self) -> &ColorMap {
        &self.color_map
    }
}

impl Default for Theme {
    fn default() -> Self {
        Self::from_parsed_rules(Vec::new())
    }
}

impl ThemeProvider for Theme {
    fn theme_match(&self, scope_name: &str) -> Arc<[ThemeTrieElementRule]> {
        let cache = self.cache.pin();
        if let Some(rules) = cache.get(scope_name) {
            return rules.clone();
        }
        let rules: Arc<[ThemeTrieElementRule]> = self.root.find(scope_name).into();
        cache.insert(scope_name.to_string(), rules.clone());
        rules
    }

    fn defaults(&self) -> ThemeTrieElementRule {
        self.defaults.clone()
    }
}

impl fmt::Debug for Theme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Theme")
            .field("name", &self.name)
            .field("colors", &self.color_map.colors())
            .field("defaults", &self.defaults)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const THEME: &str = r##"{
        "name": "test",
        "settings": [
            { "settings": { "foreground": "#F8F8F2", "background": "#272822" } },
            { "scope": "comment", "settings": { "foreground": "#75715E", "fontStyle": "italic" } },
            { "scope": "string", "settings": { "foreground": "#E6DB74" } },
            { "scope": "meta.tag string", "settings": { "foreground": "#a6e22e" } },
            { "scope": "string.quoted", "settings": { "fontStyle": "bold" } },
            { "scope": "string", "settings": { "background": "#000000" } }
        ]
    }"##;

    #[test]
    fn builds_defaults_and_color_map() {
        let theme = Theme::from_json(THEME).unwrap();
        assert_eq!(theme.name(), Some("test"));
        let defaults = theme.defaults();
        assert_eq!(defaults.font_style, Some(FontStyle::empty()));
        assert_eq!(theme.color_map().color(defaults.foreground), Some("#F8F8F2"));
        assert_eq!(theme.color_map().color(defaults.background), Some("#272822"));
    }

    #[test]
    fn builtin_defaults_without_global_rule() {
        let theme = Theme::default();
        assert_eq!(theme.color_map().colors(), &["", "#000000", "#FFFFFF"]);
        let defaults = theme.defaults();
        assert_eq!(defaults.foreground, 1);
        assert_eq!(defaults.background, 2);
    }

    #[test]
    fn later_declarations_win() {
        let theme = Theme::from_json(THEME).unwrap();
        let rules = theme.theme_match("string.quoted.double");
        let main = rules.iter().find(|r| r.parent_scopes.is_none()).unwrap();
        assert_eq!(main.scope_depth, 2);
        assert_eq!(main.font_style, Some(FontStyle::BOLD));
        assert_eq!(theme.color_map().color(main.foreground), Some("#E6DB74"));
        assert_eq!(theme.color_map().color(main.background), Some("#000000"));

        let comment = theme.theme_match("comment.line");
        assert_eq!(comment[0].font_style, Some(FontStyle::ITALIC));
    }

    #[test]
    fn parent_scoped_rules_are_reported() {
        let theme = Theme::from_json(THEME).unwrap();
        let rules = theme.theme_match("string");
        assert_eq!(rules.len(), 2);
        assert_eq!(rules[0].parent_scopes, Some(vec!["meta.tag".to_string()]));
        assert_eq!(theme.color_map().color(rules[0].foreground), Some("#A6E22E"));
        // cached
        assert!(Arc::ptr_eq(&rules, &theme.theme_match("string")));
    }
}
