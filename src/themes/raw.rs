use std::fmt;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use serde::de::{MapAccess, Visitor};
use serde::{Deserialize, Deserializer};

use crate::error::TintaResult;
use crate::themes::FontStyle;
use crate::themes::color::Color;

/// The style part of a theme setting.
#[derive(Debug, Clone, Deserialize, Default, PartialEq, Eq)]
pub struct RawThemeStyle {
    #[serde(rename = "fontStyle", default)]
    pub font_style: Option<String>,
    #[serde(default)]
    pub foreground: Option<String>,
    #[serde(default)]
    pub background: Option<String>,
}

/// Custom deserializer for the scope field that can be a comma separated string or an array
fn deserialize_scopes<'de, D>(deserializer: D) -> Result<Option<Vec<String>>, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::{self, Visitor};

    struct ScopeVisitor;

    impl<'de> Visitor<'de> for ScopeVisitor {
        type Value = Option<Vec<String>>;

        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            formatter.write_str("string or array of strings")
        }

        fn visit_none<E>(self) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(None)
        }

        fn visit_unit<E>(self) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(None)
        }

        fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            // "a, b," is the same as ["a", "b"]
            let value = value.trim_matches(',');
            Ok(Some(value.split(',').map(|s| s.to_owned()).collect()))
        }

        fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
        where
            A: de::SeqAccess<'de>,
        {
            let mut vec = Vec::new();
            while let Some(item) = seq.next_element::<String>()? {
                vec.push(item);
            }
            Ok(Some(vec))
        }
    }

    deserializer.deserialize_any(ScopeVisitor)
}

/// One entry of `settings`/`tokenColors`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct RawThemeSetting {
    #[serde(default)]
    pub name: Option<String>,
    /// `None` means the setting applies globally, like an empty scope.
    #[serde(deserialize_with = "deserialize_scopes", default)]
    pub scope: Option<Vec<String>>,
    #[serde(default)]
    pub settings: Option<RawThemeStyle>,
}

/// Editor colors used as implicit global defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EditorColors {
    pub foreground: Option<String>,
    pub background: Option<String>,
}

// Some themes have it as editor.foreground/background some don't have the editor. prefix
impl<'de> Deserialize<'de> for EditorColors {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct ColorsVisitor;

        impl<'de> Visitor<'de> for ColorsVisitor {
            type Value = EditorColors;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("a map of editor colors")
            }

            fn visit_map<V>(self, mut map: V) -> Result<EditorColors, V::Error>
            where
                V: MapAccess<'de>,
            {
                let mut colors = EditorColors::default();

                while let Some(key) = map.next_key::<String>()? {
                    let slot = match key.as_str() {
                        "foreground" | "editor.foreground" => &mut colors.foreground,
                        "background" | "editor.background" => &mut colors.background,
                        _ => {
                            let _: serde::de::IgnoredAny = map.next_value()?;
                            continue;
                        }
                    };
                    // first one wins
                    let value: Option<String> = map.next_value()?;
                    if slot.is_none() {
                        *slot = value;
                    }
                }

                Ok(colors)
            }
        }

        deserializer.deserialize_map(ColorsVisitor)
    }
}

/// Raw theme as found in a tmTheme-as-JSON or VSCode theme file
#[derive(Debug, Clone, Deserialize, Default, PartialEq, Eq)]
pub struct RawTheme {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(alias = "tokenColors", default)]
    pub settings: Vec<RawThemeSetting>,
    #[serde(default)]
    pub colors: Option<EditorColors>,
}

/// A single flattened theme rule: one scope selector with its style.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ParsedThemeRule {
    pub scope: String,
    /// Nearest ancestor first.
    pub parent_scopes: Option<Vec<String>>,
    pub index: usize,
    pub font_style: Option<FontStyle>,
    pub foreground: Option<String>,
    pub background: Option<String>,
}

fn valid_color(value: Option<&String>, scope: &str) -> Option<String> {
    let value = value?;
    match Color::from_hex(value) {
        Ok(_) => Some(value.clone()),
        Err(e) => {
            log::warn!("Ignoring color for theme scope '{scope}': {e}");
            None
        }
    }
}

impl RawTheme {
    pub fn from_json(json: &str) -> TintaResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn load_from_file(path: impl AsRef<Path>) -> TintaResult<Self> {
        let file = File::open(path)?;
        let reader = BufReader::new(file);
        Ok(serde_json::from_reader(reader)?)
    }

    /// Flattens the settings into one rule per scope selector.
    pub(crate) fn parse(&self) -> Vec<ParsedThemeRule> {
        let mut out = Vec::new();

        if let Some(colors) = &self.colors {
            out.push(ParsedThemeRule {
                scope: String::new(),
                parent_scopes: None,
                index: 0,
                font_style: None,
                foreground: valid_color(colors.foreground.as_ref(), ""),
                background: valid_color(colors.background.as_ref(), ""),
            });
        }

        // the editor colors rule sits before all the settings
        let offset = out.len();
        for (i, entry) in self.settings.iter().enumerate() {
            let Some(style) = &entry.settings else {
                continue;
            };
            let font_style = style.font_style.as_deref().map(FontStyle::parse);

            let scopes: &[String] = match &entry.scope {
                Some(s) => s,
                None => &[String::new()],
            };

            for selector in scopes {
                let mut segments: Vec<&str> = selector.split_whitespace().collect();
                let scope = segments.pop().unwrap_or_default().to_string();
                let parent_scopes = if segments.is_empty() {
                    None
                } else {
                    Some(segments.iter().rev().map(|s| s.to_string()).collect())
                };

                out.push(ParsedThemeRule {
                    foreground: valid_color(style.foreground.as_ref(), &scope),
                    background: valid_color(style.background.as_ref(), &scope),
                    scope,
                    parent_scopes,
                    index: i + offset,
                    font_style,
                });
            }
        }

        out
    }
}
