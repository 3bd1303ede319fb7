use crate::scope::ScopeList;
use crate::tokenizer::StateStack;

/// A run of text sharing the same scopes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    /// Byte offset of the first character of the token
    pub start: usize,
    /// Byte offset after the last character of the token
    pub end: usize,
    /// Scope names, root first
    pub scopes: Vec<String>,
}

/// Accumulates the runs of one line, either as [`Token`]s or as `[start, metadata]` pairs.
#[derive(Debug)]
pub(crate) struct LineTokens {
    emit_binary: bool,
    tokens: Vec<Token>,
    binary: Vec<u32>,
    last_end: usize,
}

impl LineTokens {
    pub fn new(emit_binary: bool) -> Self {
        Self {
            emit_binary,
            tokens: Vec::new(),
            binary: Vec::new(),
            last_end: 0,
        }
    }

    /// Closes the current run at `end` with the content scopes of the top of `stack`
    pub fn produce(&mut self, stack: &StateStack, end: usize) {
        self.produce_from_scopes(stack.content_scopes(), end);
    }

    pub fn produce_from_scopes(&mut self, scopes: &ScopeList, end: usize) {
        if self.last_end >= end {
            return;
        }

        if self.emit_binary {
            let metadata = scopes.metadata().bits();
            // same style as the previous run: extend it
            if self.binary.last() != Some(&metadata) {
                self.binary.push(self.last_end as u32);
                self.binary.push(metadata);
            }
            self.last_end = end;
            return;
        }

        self.tokens.push(Token {
            start: self.last_end,
            end,
            scopes: scopes.generate_scopes().into_iter().map(String::from).collect(),
        });
        self.last_end = end;
    }

    /// `line_len` includes the `\n` appended to the line, which is not part of any token.
    pub fn into_tokens(mut self, stack: &StateStack, line_len: usize) -> Vec<Token> {
        if self
            .tokens
            .last()
            .is_some_and(|t| t.start + 1 == line_len)
        {
            // only there for the `\n`
            self.tokens.pop();
        }

        if self.tokens.is_empty() {
            self.last_end = 0;
            self.produce(stack, line_len);
        }

        let text_len = line_len.saturating_sub(1);
        if let Some(last) = self.tokens.last_mut() {
            last.end = last.end.min(text_len);
        }
        self.tokens
    }

    /// Alternating start offsets and packed [`TokenMetadata`](crate::TokenMetadata) bits
    pub fn into_binary(mut self, stack: &StateStack, line_len: usize) -> Vec<u32> {
        let len = self.binary.len();
        if len >= 2 && self.binary[len - 2] as usize + 1 == line_len {
            self.binary.truncate(len - 2);
        }

        if self.binary.is_empty() {
            self.last_end = 0;
            self.produce(stack, line_len);
        }

        self.binary
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Arc;

    use super::*;
    use crate::grammars::RuleId;
    use crate::scope_metadata::ScopeMetadataProvider;
    use crate::test_utils::test_theme;

    fn setup() -> (ScopeMetadataProvider, StateStack) {
        let provider = ScopeMetadataProvider::new(0, Arc::new(test_theme()), &HashMap::new());
        let root = StateStack::root(RuleId(0), ScopeList::root("source.test", &provider));
        (provider, root)
    }

    #[test]
    fn drops_newline_run_and_clamps() {
        let (provider, root) = setup();
        let comment = root.content_scopes().push(&provider, Some("comment"));

        // "ab cd\n"
        let mut tokens = LineTokens::new(false);
        tokens.produce(&root, 3);
        tokens.produce_from_scopes(&comment, 6);
        // nothing to close
        tokens.produce(&root, 6);
        let tokens = tokens.into_tokens(&root, 6);
        assert_eq!(tokens.len(), 2);
        assert_eq!((tokens[1].start, tokens[1].end), (3, 5));
        assert_eq!(tokens[1].scopes, vec!["source.test", "comment"]);

        let mut tokens = LineTokens::new(false);
        tokens.produce(&root, 5);
        tokens.produce_from_scopes(&comment, 6);
        let tokens = tokens.into_tokens(&root, 6);
        assert_eq!(tokens.len(), 1);
        assert_eq!((tokens[0].start, tokens[0].end), (0, 5));
    }

    #[test]
    fn empty_line_gets_one_token() {
        let (_, root) = setup();
        let tokens = LineTokens::new(false).into_tokens(&root, 1);
        assert_eq!(tokens.len(), 1);
        assert_eq!((tokens[0].start, tokens[0].end), (0, 0));
        assert_eq!(tokens[0].scopes, vec!["source.test"]);
    }

    #[test]
    fn binary_runs_are_coalesced() {
        let (provider, root) = setup();
        let keyword = root.content_scopes().push(&provider, Some("keyword"));
        let comment = root.content_scopes().push(&provider, Some("comment"));
        assert_eq!(keyword.metadata(), root.content_scopes().metadata());

        let mut tokens = LineTokens::new(true);
        tokens.produce(&root, 2);
        tokens.produce_from_scopes(&keyword, 4);
        tokens.produce_from_scopes(&comment, 8);
        tokens.produce(&root, 9);
        let binary = tokens.into_binary(&root, 9);
        assert_eq!(
            binary,
            vec![0, root.content_scopes().metadata().bits(), 4, comment.metadata().bits()]
        );
    }
}
