use std::collections::HashMap;
use std::sync::Arc;

use crate::grammar::{Grammar, GrammarOptions, GrammarRepository};
use crate::grammars::RawGrammar;
use crate::themes::Theme;
use crate::tokenizer::Token;

pub const TEST_THEME: &str = r##"{
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

pub fn test_theme() -> Theme {
    Theme::from_json(TEST_THEME).unwrap()
}

/// An in-memory set of grammars
#[derive(Debug, Default)]
pub struct TestRepository {
    grammars: HashMap<String, Arc<RawGrammar>>,
    injections: HashMap<String, Vec<String>>,
}

impl TestRepository {
    pub fn with_grammar(mut self, json: &str) -> Self {
        let grammar = RawGrammar::from_json(json).unwrap();
        self.grammars
            .insert(grammar.scope_name.clone(), Arc::new(grammar));
        self
    }

    pub fn with_injection(mut self, target: &str, injector: &str) -> Self {
        self.injections
            .entry(target.to_string())
            .or_default()
            .push(injector.to_string());
        self
    }

    /// Compiles `json` against the grammars of the repository, with the test theme
    pub fn grammar(&self, json: &str, options: GrammarOptions) -> Grammar {
        let raw = Arc::new(RawGrammar::from_json(json).unwrap());
        Grammar::new(raw, self, Arc::new(test_theme()), options).unwrap()
    }
}

impl GrammarRepository for TestRepository {
    fn lookup(&self, scope_name: &str) -> Option<Arc<RawGrammar>> {
        self.grammars.get(scope_name).cloned()
    }

    fn injections(&self, scope_name: &str) -> Vec<String> {
        self.injections.get(scope_name).cloned().unwrap_or_default()
    }
}

/// One `start..end 'text' scopes` line per token
pub fn format_tokens(line: &str, tokens: &[Token]) -> Vec<String> {
    tokens
        .iter()
        .map(|t| format!("{}..{} '{}' {}", t.start, t.end, &line[t.start..t.end], t.scopes.join(" ")))
        .collect()
}
