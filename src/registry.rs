use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use arc_swap::ArcSwap;

use crate::error::{Error, TintaResult};
use crate::grammar::{Grammar, GrammarOptions, GrammarRepository};
use crate::grammars::RawGrammar;
use crate::themes::{ColorMap, Theme};

/// Finds grammar files that are not registered yet.
pub trait GrammarLocator: Send + Sync {
    /// Path of the JSON grammar for that scope name
    fn locate(&self, scope_name: &str) -> Option<PathBuf>;

    /// Grammars to inject into that scope, on top of the ones declaring `injectTo`
    fn injections(&self, _scope_name: &str) -> Vec<String> {
        Vec::new()
    }
}

/// Holds raw grammars by scope name and the grammars compiled from them, along with the
/// theme styling them.
///
/// Grammars are compiled on first use and cached.
pub struct Registry {
    grammars: papaya::HashMap<String, Arc<RawGrammar>>,
    // target scope -> scopes of the grammars injected into it
    injections: papaya::HashMap<String, Vec<String>>,
    compiled: Mutex<HashMap<String, Arc<Grammar>>>,
    theme: ArcSwap<Theme>,
    locator: Option<Box<dyn GrammarLocator>>,
}

impl Registry {
    pub fn new(theme: Theme) -> Self {
        Self {
            grammars: papaya::HashMap::new(),
            injections: papaya::HashMap::new(),
            compiled: Mutex::default(),
            theme: ArcSwap::from_pointee(theme),
            locator: None,
        }
    }

    /// Used by [`Registry::load_grammar`] to find the grammars that are not registered
    pub fn with_locator(mut self, locator: impl GrammarLocator + 'static) -> Self {
        self.locator = Some(Box::new(locator));
        self
    }

    fn compiled(&self) -> MutexGuard<'_, HashMap<String, Arc<Grammar>>> {
        // grammars are only inserted once fully built
        self.compiled.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn add_injection(&self, target: &str, injector: &str) {
        let injections = self.injections.pin();
        let mut scopes = injections.get(target).cloned().unwrap_or_default();
        if scopes.iter().any(|s| s == injector) {
            return;
        }
        scopes.push(injector.to_string());
        injections.insert(target.to_string(), scopes);
    }

    /// Registers a grammar, replacing any grammar with the same scope name.
    ///
    /// `injections` are the scopes of the grammars to inject into this one. The grammar is
    /// itself injected in every scope of its `injectTo`.
    /// Grammars already compiled are not affected.
    pub fn add_grammar(&self, raw: RawGrammar, injections: &[&str]) {
        let scope_name = raw.scope_name.clone();
        for injector in injections {
            self.add_injection(&scope_name, injector);
        }
        for target in &raw.inject_to {
            self.add_injection(target, &scope_name);
        }
        self.grammars.pin().insert(scope_name, Arc::new(raw));
    }

    /// Reads the file and registers it as a grammar, returning its scope name.
    pub fn add_grammar_from_path(&self, path: impl AsRef<Path>) -> TintaResult<String> {
        let raw = RawGrammar::load_from_file(path)?;
        let scope_name = raw.scope_name.clone();
        self.add_grammar(raw, &[]);
        Ok(scope_name)
    }

    pub fn contains_grammar(&self, scope_name: &str) -> bool {
        self.grammars.pin().contains_key(scope_name)
    }

    fn locate(&self, scope_name: &str) -> TintaResult<bool> {
        let Some(locator) = &self.locator else {
            return Ok(false);
        };
        let Some(path) = locator.locate(scope_name) else {
            return Ok(false);
        };
        let raw = RawGrammar::load_from_file(&path)?;
        let injections = locator.injections(scope_name);
        let injections: Vec<&str> = injections.iter().map(String::as_str).collect();
        self.add_grammar(raw, &injections);
        Ok(true)
    }

    /// Makes sure `scope_name` and every grammar it depends on are registered, then compiles it.
    ///
    /// Grammars that are not registered yet are loaded through the locator, breadth first.
    /// Only a missing `scope_name` is an error: missing dependencies are skipped.
    pub fn load_grammar(
        &self,
        scope_name: &str,
        options: GrammarOptions,
    ) -> TintaResult<Arc<Grammar>> {
        let mut seen = HashSet::from([scope_name.to_string()]);
        let mut queue = VecDeque::from([scope_name.to_string()]);

        while let Some(scope) = queue.pop_front() {
            if !self.contains_grammar(&scope) && !self.locate(&scope)? {
                if scope == scope_name {
                    return Err(Error::GrammarNotFound(scope));
                }
                log::warn!("Grammar {scope} not found, needed by {scope_name}");
                continue;
            }

            let Some(raw) = self.lookup(&scope) else {
                continue;
            };
            for dependency in raw.included_scopes().into_iter().chain(self.injections(&scope)) {
                if seen.insert(dependency.clone()) {
                    queue.push_back(dependency);
                }
            }
        }

        self.grammar_for_scope_name(scope_name, options)
    }

    /// The compiled grammar for that scope. It is built the first time with the given options,
    /// later calls return it as is.
    pub fn grammar_for_scope_name(
        &self,
        scope_name: &str,
        options: GrammarOptions,
    ) -> TintaResult<Arc<Grammar>> {
        let mut compiled = self.compiled();
        if let Some(grammar) = compiled.get(scope_name) {
            return Ok(grammar.clone());
        }

        let raw = self
            .lookup(scope_name)
            .ok_or_else(|| Error::GrammarNotFound(scope_name.to_string()))?;
        let grammar = Arc::new(Grammar::new(raw, self, self.theme.load_full(), options)?);
        compiled.insert(scope_name.to_string(), grammar.clone());
        Ok(grammar)
    }

    /// Replaces the theme, for the grammars already compiled as well
    pub fn set_theme(&self, theme: Theme) {
        let theme = Arc::new(theme);
        self.theme.store(theme.clone());
        for grammar in self.compiled().values() {
            grammar.set_theme(theme.clone());
        }
    }

    pub fn theme(&self) -> Arc<Theme> {
        self.theme.load_full()
    }

    /// The colors of the current theme, indexed by the color ids of the token metadata
    pub fn color_map(&self) -> ColorMap {
        self.theme.load().color_map().clone()
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new(Theme::default())
    }
}

impl GrammarRepository for Registry {
    fn lookup(&self, scope_name: &str) -> Option<Arc<RawGrammar>> {
        self.grammars.pin().get(scope_name).cloned()
    }

    fn injections(&self, scope_name: &str) -> Vec<String> {
        self.injections
            .pin()
            .get(scope_name)
            .cloned()
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;
    use crate::test_utils::{TEST_THEME, format_tokens, test_theme};

    const TEST: &str = r##"{
        "scopeName": "source.test",
        "patterns": [
            { "begin": "#", "end": "$", "name": "comment.line" },
            { "include": "source.numbers" }
        ]
    }"##;

    const NUMBERS: &str = r#"{
        "scopeName": "source.numbers",
        "patterns": [{ "match": "\\d+", "name": "constant.numeric" }]
    }"#;

    const TODO: &str = r#"{
        "scopeName": "text.todo",
        "injectionSelector": "L:comment",
        "injectTo": ["source.test"],
        "patterns": [{ "match": "TODO", "name": "keyword.todo" }]
    }"#;

    struct DirLocator(PathBuf);

    impl GrammarLocator for DirLocator {
        fn locate(&self, scope_name: &str) -> Option<PathBuf> {
            let path = self.0.join(format!("{scope_name}.json"));
            path.exists().then_some(path)
        }
    }

    fn grammar_dir(name: &str, grammars: &[(&str, &str)]) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("tinta-{name}-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        for (scope, json) in grammars {
            fs::write(dir.join(format!("{scope}.json")), json).unwrap();
        }
        dir
    }

    fn registry() -> Registry {
        let registry = Registry::new(test_theme());
        for json in [TEST, NUMBERS, TODO] {
            registry.add_grammar(RawGrammar::from_json(json).unwrap(), &[]);
        }
        registry
    }

    #[test]
    fn compiles_with_includes_and_inject_to() {
        let registry = registry();
        assert_eq!(registry.injections("source.test"), vec!["text.todo"]);

        let grammar = registry
            .grammar_for_scope_name("source.test", GrammarOptions::new())
            .unwrap();
        let line = "1 #TODO";
        let result = grammar.tokenize_line(line, None).unwrap();
        assert_eq!(
            format_tokens(line, &result.tokens),
            vec![
                "0..1 '1' source.test constant.numeric",
                "1..2 ' ' source.test",
                "2..3 '#' source.test comment.line",
                "3..7 'TODO' source.test comment.line keyword.todo",
            ]
        );
    }

    #[test]
    fn compiled_grammars_are_cached() {
        let registry = registry();
        let a = registry
            .grammar_for_scope_name("source.test", GrammarOptions::new())
            .unwrap();
        let b = registry
            .grammar_for_scope_name("source.test", GrammarOptions::new().debug(true))
            .unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn unknown_scope_is_an_error() {
        let registry = registry();
        let err = registry
            .grammar_for_scope_name("source.nope", GrammarOptions::new())
            .unwrap_err();
        assert!(matches!(err, Error::GrammarNotFound(scope) if scope == "source.nope"));
        let err = registry
            .load_grammar("source.nope", GrammarOptions::new())
            .unwrap_err();
        assert!(matches!(err, Error::GrammarNotFound(_)));
    }

    #[test]
    fn loads_dependencies_through_the_locator() {
        let dir = grammar_dir(
            "load",
            &[("source.test", TEST), ("source.numbers", NUMBERS), ("text.todo", TODO)],
        );
        let registry = Registry::new(test_theme()).with_locator(DirLocator(dir.clone()));
        let grammar = registry
            .load_grammar("source.test", GrammarOptions::new())
            .unwrap();
        assert!(registry.contains_grammar("source.numbers"));
        // only found through `injectTo`, which requires loading it first
        assert!(!registry.contains_grammar("text.todo"));

        let result = grammar.tokenize_line("12", None).unwrap();
        assert_eq!(result.tokens[0].scopes, vec!["source.test", "constant.numeric"]);
        fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn missing_dependencies_are_skipped() {
        let dir = grammar_dir("missing", &[("source.test", TEST)]);
        let registry = Registry::new(test_theme()).with_locator(DirLocator(dir.clone()));
        let grammar = registry
            .load_grammar("source.test", GrammarOptions::new())
            .unwrap();
        let result = grammar.tokenize_line("12", None).unwrap();
        assert_eq!(result.tokens[0].scopes, vec!["source.test"]);
        fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn set_theme_updates_compiled_grammars() {
        let registry = Registry::default();
        registry.add_grammar(RawGrammar::from_json(TEST).unwrap(), &[]);
        let grammar = registry
            .grammar_for_scope_name("source.test", GrammarOptions::new())
            .unwrap();
        assert_eq!(registry.color_map().colors(), &["", "#000000", "#FFFFFF"]);

        registry.set_theme(Theme::from_json(TEST_THEME).unwrap());
        assert_eq!(registry.theme().name(), Some("test"));
        let result = grammar.tokenize_line2("# c", None).unwrap();
        let metadata = crate::TokenMetadata::from_bits(result.tokens[1]);
        assert_eq!(registry.color_map().color(metadata.foreground()), Some("#75715E"));
    }
}
