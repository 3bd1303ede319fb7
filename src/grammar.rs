use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use arc_swap::ArcSwap;

use crate::error::TintaResult;
use crate::grammars::{CompiledRules, Injection, RawGrammar, RuleFactory, RuleId, RuleRegistry};
use crate::scope::ScopeList;
use crate::scope_metadata::{ScopeMetadata, ScopeMetadataProvider};
use crate::themes::ThemeProvider;
use crate::tokenizer::{LineTokens, StateStack, Token, Tokenizer};

/// Where a grammar being compiled gets the other grammars it refers to.
pub trait GrammarRepository {
    /// The raw grammar for that scope name, if known
    fn lookup(&self, scope_name: &str) -> Option<Arc<RawGrammar>>;

    /// Scope names of the grammars injecting themselves into that scope
    fn injections(&self, scope_name: &str) -> Vec<String>;
}

/// Options used when building a [`Grammar`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GrammarOptions {
    pub(crate) initial_language: u8,
    pub(crate) embedded_languages: HashMap<String, u8>,
    pub(crate) debug: bool,
}

impl GrammarOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// The language id stored in the metadata of tokens outside any embedded language
    pub fn initial_language(mut self, value: u8) -> Self {
        self.initial_language = value;
        self
    }

    /// Maps scope name prefixes, like `source.css`, to a language id.
    /// Id 0 is reserved and ignored.
    pub fn embedded_language(mut self, scope: &str, language_id: u8) -> Self {
        self.embedded_languages.insert(scope.to_string(), language_id);
        self
    }

    /// Logs every step of the tokenizer at the debug level. Very noisy.
    pub fn debug(mut self, value: bool) -> Self {
        self.debug = value;
        self
    }
}

/// The output of [`Grammar::tokenize_line`]
#[derive(Debug, Clone)]
pub struct TokenizeLineResult {
    pub tokens: Vec<Token>,
    /// The state to give when tokenizing the next line
    pub rule_stack: StateStack,
}

/// The output of [`Grammar::tokenize_line2`]
#[derive(Debug, Clone)]
pub struct TokenizeLineResult2 {
    /// Alternating token start offsets and packed [`TokenMetadata`](crate::TokenMetadata)
    pub tokens: Vec<u32>,
    /// The state to give when tokenizing the next line
    pub rule_stack: StateStack,
}

/// A grammar compiled along with everything it includes, ready to tokenize lines.
pub struct Grammar {
    scope_name: String,
    rules: RuleRegistry,
    root_id: RuleId,
    injections: Vec<Injection>,
    metadata: ArcSwap<ScopeMetadataProvider>,
    options: GrammarOptions,
}

impl Grammar {
    /// Compiles `raw`, resolving its external includes and injections through `repository`.
    ///
    /// Fails if one of the patterns is not a valid regex.
    pub fn new(
        raw: Arc<RawGrammar>,
        repository: &dyn GrammarRepository,
        theme: Arc<dyn ThemeProvider>,
        options: GrammarOptions,
    ) -> TintaResult<Self> {
        let scope_name = raw.scope_name.clone();
        let CompiledRules {
            rules,
            root_id,
            injections,
        } = RuleFactory::compile(raw, repository)?;
        let metadata = ScopeMetadataProvider::new(
            options.initial_language,
            theme,
            &options.embedded_languages,
        );

        Ok(Self {
            scope_name,
            rules,
            root_id,
            injections,
            metadata: ArcSwap::from_pointee(metadata),
            options,
        })
    }

    pub fn scope_name(&self) -> &str {
        &self.scope_name
    }

    /// Swaps the theme used to style tokens. Tokenize calls already running finish with the
    /// previous one.
    pub fn set_theme(&self, theme: Arc<dyn ThemeProvider>) {
        self.metadata.store(Arc::new(ScopeMetadataProvider::new(
            self.options.initial_language,
            theme,
            &self.options.embedded_languages,
        )));
    }

    pub fn scope_metadata(&self, scope_name: &str) -> Arc<ScopeMetadata> {
        self.metadata.load().lookup(Some(scope_name))
    }

    /// Compiles ahead of time every pattern set that will be needed.
    /// Sets depending on back-references are still built when first used.
    pub fn precompile(&self) -> TintaResult<()> {
        self.rules.precompile()
    }

    /// The state at the start of a document
    pub fn initial_state(&self) -> StateStack {
        let metadata = self.metadata.load();
        StateStack::root(self.root_id, ScopeList::root(&self.scope_name, &metadata))
    }

    fn tokenize(
        &self,
        line: &str,
        prev_state: Option<&StateStack>,
        emit_binary: bool,
    ) -> TintaResult<(LineTokens, StateStack, usize)> {
        let metadata = self.metadata.load();
        let (stack, is_first_line) = match prev_state {
            Some(stack) => (stack.clone(), false),
            None => (
                StateStack::root(self.root_id, ScopeList::root(&self.scope_name, &metadata)),
                true,
            ),
        };

        let line = format!("{line}\n");
        let tokenizer =
            Tokenizer::new(&self.rules, &self.injections, &metadata, self.options.debug);
        let mut tokens = LineTokens::new(emit_binary);
        let stack = tokenizer.tokenize_string(stack, &line, 0, is_first_line, true, &mut tokens)?;
        Ok((tokens, stack, line.len()))
    }

    /// Tokenizes one line, without its line terminator. `prev_state` is the `rule_stack` of
    /// the previous line, `None` for the first line of a document.
    pub fn tokenize_line(
        &self,
        line: &str,
        prev_state: Option<&StateStack>,
    ) -> TintaResult<TokenizeLineResult> {
        let (tokens, rule_stack, line_len) = self.tokenize(line, prev_state, false)?;
        Ok(TokenizeLineResult {
            tokens: tokens.into_tokens(&rule_stack, line_len),
            rule_stack,
        })
    }

    /// Same as [`Grammar::tokenize_line`] but the tokens are packed with their style.
    /// Adjacent tokens with the same metadata are merged.
    pub fn tokenize_line2(
        &self,
        line: &str,
        prev_state: Option<&StateStack>,
    ) -> TintaResult<TokenizeLineResult2> {
        let (tokens, rule_stack, line_len) = self.tokenize(line, prev_state, true)?;
        Ok(TokenizeLineResult2 {
            tokens: tokens.into_binary(&rule_stack, line_len),
            rule_stack,
        })
    }

    /// Tokenizes a whole document, one `Vec` of tokens per line.
    ///
    /// A final `\n` ends the last line and does not start an empty one.
    /// An empty document is a single empty line.
    pub fn tokenize_string(&self, text: &str) -> TintaResult<Vec<Vec<Token>>> {
        let mut state: Option<StateStack> = None;
        let mut out = Vec::new();

        let text = text.strip_suffix('\n').unwrap_or(text);
        for line in text.split('\n') {
            let line = line.strip_suffix('\r').unwrap_or(line);
            let result = self.tokenize_line(line, state.as_ref())?;
            out.push(result.tokens);
            state = Some(result.rule_stack);
        }

        Ok(out)
    }
}

impl fmt::Debug for Grammar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Grammar")
            .field("scope_name", &self.scope_name)
            .field("rules", &self.rules.len())
            .field("injections", &self.injections.len())
            .finish()
    }
}
