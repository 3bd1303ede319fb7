use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use serde::de::{self, MapAccess, Visitor};
use serde::{Deserialize, Deserializer};

use crate::error::TintaResult;

/// Any rule of a TextMate grammar: which fields are set decides what kind of rule it is.
///
/// # Examples
/// A match rule:
/// ```json
/// {
///   "match": "\\b(function)\\s+(\\w+)\\s*\\(",
///   "name": "meta.function.declaration.js",
///   "captures": {
///     "1": { "name": "storage.type.function.js" },
///     "2": { "name": "entity.name.function.js" }
///   }
/// }
/// ```
///
/// A begin/end rule, `\\1` in `end` refers to what `begin` captured:
/// ```json
/// {
///   "name": "string.quoted.other.js",
///   "begin": "(['\"])",
///   "end": "\\1",
///   "patterns": [{ "match": "\\\\.", "name": "constant.character.escape.js" }]
/// }
/// ```
///
/// A begin/while rule, the region goes on as long as `while` matches on the next lines:
/// ```json
/// {
///   "name": "markup.quote.markdown",
///   "begin": "^\\s*(>) ?",
///   "while": "(^|\\G)\\s*(>) ?",
///   "patterns": [{ "include": "#block" }]
/// }
/// ```
///
/// An include:
/// ```json
/// { "include": "source.js#expressions" }
/// ```
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(rename_all(deserialize = "camelCase"))]
pub struct RawRule {
    /// - "#name": a rule of the repository
    /// - "$self": the root of the current grammar
    /// - "$base": the root of the grammar that started the tokenization
    /// - "source.lang" or "source.lang#name": another grammar
    #[serde(default)]
    pub include: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub content_name: Option<String>,
    #[serde(rename(deserialize = "match"), default)]
    pub match_: Option<String>,
    #[serde(default)]
    pub captures: Option<RawCaptures>,
    #[serde(default)]
    pub begin: Option<String>,
    #[serde(default)]
    pub begin_captures: Option<RawCaptures>,
    #[serde(default)]
    pub end: Option<String>,
    #[serde(default)]
    pub end_captures: Option<RawCaptures>,
    #[serde(rename(deserialize = "while"), default)]
    pub while_: Option<String>,
    #[serde(default)]
    pub while_captures: Option<RawCaptures>,
    #[serde(default)]
    pub patterns: Option<Vec<RawRule>>,
    #[serde(default, deserialize_with = "deserialize_repository")]
    pub repository: Option<HashMap<String, RawRule>>,
    #[serde(default, deserialize_with = "deserialize_bool_or_int")]
    pub apply_end_pattern_last: bool,
}

/// Capture group number (as a string, eg "1") to the rule applied to it
pub type RawCaptures = HashMap<String, RawRule>;

/// Top-level structure representing a complete TextMate grammar
///
/// # Examples
/// ```json
/// {
///   "name": "JavaScript",
///   "scopeName": "source.js",
///   "fileTypes": ["js", "jsx", "mjs"],
///   "patterns": [
///     { "include": "#statements" }
///   ],
///   "repository": {
///     "statements": {
///       "patterns": [{ "include": "#keywords" }]
///     },
///     "keywords": [
///       { "match": "\\bif\\b", "name": "keyword.control.if.js" }
///     ]
///   },
///   "injections": {
///     "L:comment.line.double-slash.js": {
///       "patterns": [{ "match": "TODO", "name": "keyword.todo" }]
///     }
///   }
/// }
/// ```
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(rename_all(deserialize = "camelCase"))]
pub struct RawGrammar {
    /// Unique identifier for this grammar's scope
    /// Example: "source.js", "text.html.markdown", "source.rust"
    pub scope_name: String,
    /// Human-readable name of the language
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub file_types: Vec<String>,
    #[serde(default)]
    pub first_line_match: Option<String>,
    /// Root patterns
    #[serde(default)]
    pub patterns: Vec<RawRule>,
    #[serde(default, deserialize_with = "deserialize_repository")]
    pub repository: Option<HashMap<String, RawRule>>,
    /// Selector to rule, in declaration order since it matters when several match
    #[serde(default, deserialize_with = "deserialize_injections")]
    pub injections: Vec<(String, RawRule)>,
    /// Where this grammar injects itself when it's registered as an injection of another
    #[serde(default)]
    pub injection_selector: Option<String>,
    /// Scopes this grammar wants to be injected into
    #[serde(default)]
    pub inject_to: Vec<String>,
}

/// Repository entries can be a rule or directly an array of rules
#[derive(Deserialize)]
#[serde(untagged)]
enum RepositoryEntry {
    Patterns(Vec<RawRule>),
    Rule(Box<RawRule>),
}

impl From<RepositoryEntry> for RawRule {
    fn from(entry: RepositoryEntry) -> Self {
        match entry {
            RepositoryEntry::Patterns(patterns) => RawRule {
                patterns: Some(patterns),
                ..Default::default()
            },
            RepositoryEntry::Rule(rule) => *rule,
        }
    }
}

fn deserialize_repository<'de, D>(
    deserializer: D,
) -> Result<Option<HashMap<String, RawRule>>, D::Error>
where
    D: Deserializer<'de>,
{
    let entries: Option<HashMap<String, RepositoryEntry>> = Option::deserialize(deserializer)?;
    Ok(entries.map(|e| e.into_iter().map(|(k, v)| (k, v.into())).collect()))
}

fn deserialize_injections<'de, D>(deserializer: D) -> Result<Vec<(String, RawRule)>, D::Error>
where
    D: Deserializer<'de>,
{
    struct InjectionsVisitor;

    impl<'de> Visitor<'de> for InjectionsVisitor {
        type Value = Vec<(String, RawRule)>;

        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            formatter.write_str("a map of selectors to rules")
        }

        fn visit_unit<E>(self) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(Vec::new())
        }

        fn visit_map<V>(self, mut map: V) -> Result<Self::Value, V::Error>
        where
            V: MapAccess<'de>,
        {
            let mut out = Vec::new();
            while let Some((selector, entry)) = map.next_entry::<String, RepositoryEntry>()? {
                out.push((selector, entry.into()));
            }
            Ok(out)
        }
    }

    deserializer.deserialize_any(InjectionsVisitor)
}

/// `applyEndPatternLast` is found both as a boolean and as 0/1
fn deserialize_bool_or_int<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    struct BoolOrIntVisitor;

    impl<'de> Visitor<'de> for BoolOrIntVisitor {
        type Value = bool;

        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            formatter.write_str("a boolean or an integer")
        }

        fn visit_bool<E>(self, value: bool) -> Result<bool, E>
        where
            E: de::Error,
        {
            Ok(value)
        }

        fn visit_u64<E>(self, value: u64) -> Result<bool, E>
        where
            E: de::Error,
        {
            Ok(value != 0)
        }

        fn visit_i64<E>(self, value: i64) -> Result<bool, E>
        where
            E: de::Error,
        {
            Ok(value != 0)
        }

        fn visit_unit<E>(self) -> Result<bool, E>
        where
            E: de::Error,
        {
            Ok(false)
        }
    }

    deserializer.deserialize_any(BoolOrIntVisitor)
}

/// Splits an include into the external grammar scope and an optional repository rule name.
/// Returns `None` for includes resolved within the grammar.
pub(crate) fn external_include(include: &str) -> Option<(&str, Option<&str>)> {
    if include == "$self" || include == "$base" || include.starts_with('#') || include.is_empty() {
        return None;
    }
    match include.split_once('#') {
        Some((scope, rule)) => Some((scope, Some(rule))),
        None => Some((include, None)),
    }
}

fn collect_in_patterns<'a>(out: &mut BTreeSet<String>, patterns: impl Iterator<Item = &'a RawRule>) {
    for rule in patterns {
        collect_in_rule(out, rule);
    }
}

fn collect_in_rule(out: &mut BTreeSet<String>, rule: &RawRule) {
    if let Some((scope, _)) = rule.include.as_deref().and_then(external_include) {
        out.insert(scope.to_string());
    }
    if let Some(patterns) = &rule.patterns {
        collect_in_patterns(out, patterns.iter());
    }
    if let Some(repository) = &rule.repository {
        collect_in_patterns(out, repository.values());
    }
    for captures in [&rule.captures, &rule.begin_captures, &rule.end_captures, &rule.while_captures]
        .into_iter()
        .flatten()
    {
        collect_in_patterns(out, captures.values());
    }
}

impl RawGrammar {
    pub fn from_json(json: &str) -> TintaResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn load_from_file(path: impl AsRef<Path>) -> TintaResult<Self> {
        let file = File::open(path)?;
        let reader = BufReader::new(file);
        Ok(serde_json::from_reader(reader)?)
    }

    /// All the other grammars this one includes, sorted, without its own scope.
    pub fn included_scopes(&self) -> Vec<String> {
        let mut out = BTreeSet::new();
        collect_in_patterns(&mut out, self.patterns.iter());
        if let Some(repository) = &self.repository {
            collect_in_patterns(&mut out, repository.values());
        }
        collect_in_patterns(&mut out, self.injections.iter().map(|(_, rule)| rule));
        out.remove(&self.scope_name);
        out.into_iter().collect()
    }
}
