mod stack;
mod tokens;

use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::TintaResult;
use crate::grammars::{AnchorActive, Injection, PatternSetMatch, Rule, RuleId, RuleRegistry};
use crate::scope::ScopeList;
use crate::scope_metadata::ScopeMetadataProvider;

pub use stack::StateStack;
pub(crate) use tokens::LineTokens;
pub use tokens::Token;

static GENERATION: AtomicU64 = AtomicU64::new(0);

/// Every tokenize call gets its own generation, which scopes the positions recorded in the
/// stack frames to that call
pub(crate) fn next_generation() -> u64 {
    GENERATION.fetch_add(1, Ordering::Relaxed) + 1
}

/// The state left by the while conditions check
struct WhileCheck {
    stack: StateStack,
    pos: usize,
    is_first_line: bool,
    anchor_position: Option<usize>,
}

/// Tokenizes the lines of one grammar: holds everything one tokenize call needs.
pub(crate) struct Tokenizer<'g> {
    rules: &'g RuleRegistry,
    injections: &'g [Injection],
    metadata: &'g ScopeMetadataProvider,
    generation: u64,
    debug: bool,
}

impl<'g> Tokenizer<'g> {
    pub fn new(
        rules: &'g RuleRegistry,
        injections: &'g [Injection],
        metadata: &'g ScopeMetadataProvider,
        debug: bool,
    ) -> Self {
        Self {
            rules,
            injections,
            metadata,
            generation: next_generation(),
            debug,
        }
    }

    fn push_scopes(&self, scopes: &ScopeList, name: Option<&str>) -> ScopeList {
        scopes.push(self.metadata, name)
    }

    fn find(
        &self,
        rule_id: RuleId,
        end_rule: Option<&str>,
        line: &str,
        pos: usize,
        anchors: AnchorActive,
    ) -> TintaResult<Option<PatternSetMatch>> {
        let set = self.rules.compile(rule_id, end_rule, anchors)?;
        Ok(set.find_at(line, pos))
    }

    /// Finds the best injection match: the one starting first, the earliest declared one with
    /// the highest priority on ties. Also returns whether it's a priority (`L:`) injection.
    fn match_injections(
        &self,
        stack: &StateStack,
        line: &str,
        pos: usize,
        anchors: AnchorActive,
    ) -> TintaResult<Option<(PatternSetMatch, bool)>> {
        if self.injections.is_empty() {
            return Ok(None);
        }

        let scopes = stack.content_scopes().generate_scopes();
        let mut best: Option<(PatternSetMatch, bool)> = None;

        for injection in self.injections {
            if !injection.matcher.matches(&scopes) {
                continue;
            }
            let Some(m) = self.find(injection.rule_id, None, line, pos, anchors)? else {
                continue;
            };
            // injections are sorted by priority so an earlier one wins ties
            if best.as_ref().is_some_and(|(b, _)| m.start >= b.start) {
                continue;
            }
            let at_pos = m.start == pos;
            best = Some((m, injection.priority_match));
            if at_pos {
                break;
            }
        }

        Ok(best)
    }

    fn match_rule_or_injections(
        &self,
        stack: &StateStack,
        line: &str,
        pos: usize,
        is_first_line: bool,
        anchor_position: Option<usize>,
    ) -> TintaResult<Option<PatternSetMatch>> {
        let anchors = AnchorActive::new(is_first_line, anchor_position == Some(pos));
        let rule_match = self.find(stack.rule_id(), stack.end_rule(), line, pos, anchors)?;
        let Some((injection_match, priority_match)) =
            self.match_injections(stack, line, pos, anchors)?
        else {
            return Ok(rule_match);
        };

        let Some(rule_match) = rule_match else {
            return Ok(Some(injection_match));
        };

        if injection_match.start < rule_match.start
            || (priority_match && injection_match.start == rule_match.start)
        {
            if self.debug {
                log::debug!(
                    "[match_rule_or_injections] injection {:?} wins at {}",
                    injection_match.rule_id,
                    injection_match.start
                );
            }
            return Ok(Some(injection_match));
        }
        Ok(Some(rule_match))
    }

    /// Begin/while rules only go on as long as their while pattern matches at the start of
    /// every new line. Outer rules are checked first: when one stops, everything above it does
    /// as well.
    fn check_while_conditions(
        &self,
        stack: StateStack,
        line: &str,
        mut pos: usize,
        mut is_first_line: bool,
        tokens: &mut LineTokens,
    ) -> TintaResult<WhileCheck> {
        let mut anchor_position = if stack.begin_captured_eol() { Some(0) } else { None };

        let mut while_frames = Vec::new();
        let mut node = Some(&stack);
        while let Some(frame) = node {
            if let Some(Rule::BeginWhile(rule)) = self.rules.get(frame.rule_id()) {
                while_frames.push((rule, frame.clone()));
            }
            node = frame.parent();
        }

        let mut out = stack.clone();
        for (rule, frame) in while_frames.into_iter().rev() {
            let anchors = AnchorActive::new(is_first_line, anchor_position == Some(pos));
            let set = self.rules.compile_while(frame.rule_id(), frame.end_rule(), anchors)?;
            let m = set.find_at(line, pos).filter(|m| m.rule_id == RuleId::WHILE);

            let Some(m) = m else {
                if self.debug {
                    log::debug!("[check_while_conditions] rule {:?} stops", frame.rule_id());
                }
                out = frame.pop();
                break;
            };

            tokens.produce(&frame, m.start);
            self.handle_captures(
                &frame,
                line,
                &rule.while_captures,
                &m.capture_pos,
                tokens,
                is_first_line,
            )?;
            tokens.produce(&frame, m.end);
            anchor_position = Some(m.end);
            if m.end > pos {
                pos = m.end;
                is_first_line = false;
            }
        }

        Ok(WhileCheck {
            stack: out,
            pos,
            is_first_line,
            anchor_position,
        })
    }

    /// Emits the scopes of capture groups, tokenizing again the ones with their own patterns.
    fn handle_captures(
        &self,
        stack: &StateStack,
        line: &str,
        captures: &[Option<RuleId>],
        capture_pos: &[Option<(usize, usize)>],
        tokens: &mut LineTokens,
        is_first_line: bool,
    ) -> TintaResult<()> {
        if captures.is_empty() {
            return Ok(());
        }
        let Some(Some((_, max_end))) = capture_pos.first() else {
            return Ok(());
        };
        let max_end = *max_end;

        // captures still open with where they end
        let mut local_stack: Vec<(ScopeList, usize)> = Vec::new();

        for (capture_id, pos) in captures.iter().zip(capture_pos) {
            let Some(rule) = capture_id.and_then(|id| self.rules.get(id)) else {
                continue;
            };
            let Rule::Capture(capture) = rule else {
                continue;
            };
            let Some((start, end)) = *pos else {
                continue;
            };
            if start == end {
                continue;
            }
            // a capture in a lookahead
            if start > max_end {
                break;
            }

            while local_stack.last().is_some_and(|(_, e)| *e <= start) {
                if let Some((scopes, e)) = local_stack.pop() {
                    tokens.produce_from_scopes(&scopes, e);
                }
            }
            match local_stack.last() {
                Some((scopes, _)) => tokens.produce_from_scopes(scopes, start),
                None => tokens.produce(stack, start),
            }

            let name = rule.name(line, capture_pos);

            if let Some(retokenize) = capture.retokenize {
                let name_scopes = self.push_scopes(stack.content_scopes(), name.as_deref());
                let content_name = rule.content_name(line, capture_pos);
                let content_scopes = self.push_scopes(&name_scopes, content_name.as_deref());
                let pushed = stack.push(
                    retokenize,
                    self.generation,
                    start,
                    None,
                    false,
                    name_scopes,
                    content_scopes,
                );
                let captured_line = line.get(..end).unwrap_or(line);
                self.tokenize_string(
                    pushed,
                    captured_line,
                    start,
                    is_first_line && start == 0,
                    false,
                    tokens,
                )?;
                continue;
            }

            if let Some(name) = name {
                let base = local_stack
                    .last()
                    .map(|(scopes, _)| scopes)
                    .unwrap_or(stack.content_scopes());
                let scopes = self.push_scopes(base, Some(name.as_ref()));
                local_stack.push((scopes, end));
            }
        }

        while let Some((scopes, end)) = local_stack.pop() {
            tokens.produce_from_scopes(&scopes, end);
        }

        Ok(())
    }

    /// Tokenizes `line` from `pos`, returning the stack to carry over to the next line.
    ///
    /// A grammar can match without advancing. When that would loop forever, the rest of the
    /// line is emitted as a single token and we stop there.
    pub fn tokenize_string(
        &self,
        stack: StateStack,
        line: &str,
        pos: usize,
        is_first_line: bool,
        check_while_conditions: bool,
        tokens: &mut LineTokens,
    ) -> TintaResult<StateStack> {
        let line_len = line.len();
        let mut stack = stack;
        let mut pos = pos;
        let mut is_first_line = is_first_line;
        let mut anchor_position = None;

        // 1. We check if the while patterns still hold
        if check_while_conditions {
            let check = self.check_while_conditions(stack, line, pos, is_first_line, tokens)?;
            stack = check.stack;
            pos = check.pos;
            is_first_line = check.is_first_line;
            anchor_position = check.anchor_position;
        }

        // 2. We look for the next match until the end of the line
        loop {
            if self.debug {
                log::debug!("[tokenize_string] Scanning {pos}: |{:?}|", line.get(pos..));
            }

            let Some(m) =
                self.match_rule_or_injections(&stack, line, pos, is_first_line, anchor_position)?
            else {
                if self.debug {
                    log::debug!("[tokenize_string] no more matches");
                }
                tokens.produce(&stack, line_len);
                return Ok(stack);
            };

            let has_advanced = m.end > pos;

            if m.rule_id == RuleId::END {
                let Some(Rule::BeginEnd(popped_rule)) = self.rules.get(stack.rule_id()) else {
                    tokens.produce(&stack, line_len);
                    return Ok(stack);
                };
                if self.debug {
                    log::debug!("[tokenize_string] end of rule {:?} at {}", stack.rule_id(), m.start);
                }

                tokens.produce(&stack, m.start);
                stack = stack.with_content_scopes(stack.name_scopes().clone());
                self.handle_captures(
                    &stack,
                    line,
                    &popped_rule.end_captures,
                    &m.capture_pos,
                    tokens,
                    is_first_line,
                )?;
                tokens.produce(&stack, m.end);

                let popped = stack;
                stack = popped.pop();
                anchor_position = popped.anchor_pos(self.generation);

                if !has_advanced && popped.enter_pos(self.generation) == Some(pos) {
                    log::warn!(
                        "Grammar is in an endless loop: rule {:?} was pushed and popped at {pos} without advancing",
                        popped.rule_id()
                    );
                    // keep the rule active like it was before it got popped
                    stack = popped;
                    tokens.produce(&stack, line_len);
                    return Ok(stack);
                }
            } else {
                let Some(rule) = self.rules.get(m.rule_id) else {
                    tokens.produce(&stack, line_len);
                    return Ok(stack);
                };
                if self.debug {
                    log::debug!(
                        "[tokenize_string] matched rule {:?} from {} to {}",
                        m.rule_id,
                        m.start,
                        m.end
                    );
                }

                tokens.produce(&stack, m.start);
                let before_push = stack.clone();
                let name = rule.name(line, &m.capture_pos);
                let name_scopes = self.push_scopes(stack.content_scopes(), name.as_deref());
                stack = stack.push(
                    m.rule_id,
                    self.generation,
                    pos,
                    anchor_position,
                    m.end == line_len,
                    name_scopes.clone(),
                    name_scopes.clone(),
                );

                let (begin_captures, end_rule) = match rule {
                    Rule::BeginEnd(r) => (
                        &r.begin_captures,
                        r.end
                            .has_back_references()
                            .then(|| r.end.resolve_back_references(line, &m.capture_pos)),
                    ),
                    Rule::BeginWhile(r) => (
                        &r.begin_captures,
                        r.while_
                            .has_back_references()
                            .then(|| r.while_.resolve_back_references(line, &m.capture_pos)),
                    ),
                    Rule::Match(r) => {
                        self.handle_captures(
                            &stack,
                            line,
                            &r.captures,
                            &m.capture_pos,
                            tokens,
                            is_first_line,
                        )?;
                        tokens.produce(&stack, m.end);
                        // match rules never stay on the stack
                        stack = stack.pop();

                        if !has_advanced {
                            log::warn!(
                                "Grammar is in an endless loop: rule {:?} matched at {pos} without advancing",
                                m.rule_id
                            );
                            stack = stack.pop();
                            tokens.produce(&stack, line_len);
                            return Ok(stack);
                        }
                        advance(&mut pos, &mut is_first_line, m.end);
                        continue;
                    }
                    Rule::IncludeOnly(_) | Rule::Capture(_) => {
                        stack = stack.pop();
                        advance(&mut pos, &mut is_first_line, m.end);
                        continue;
                    }
                };

                self.handle_captures(
                    &stack,
                    line,
                    begin_captures,
                    &m.capture_pos,
                    tokens,
                    is_first_line,
                )?;
                tokens.produce(&stack, m.end);
                anchor_position = Some(m.end);

                let content_name = rule.content_name(line, &m.capture_pos);
                let content_scopes = self.push_scopes(&name_scopes, content_name.as_deref());
                stack = stack.with_content_scopes(content_scopes);
                if let Some(end_rule) = end_rule {
                    stack = stack.with_end_rule(end_rule);
                }

                if !has_advanced && before_push.has_same_rule_as(&stack, self.generation) {
                    log::warn!(
                        "Grammar is in an endless loop: rule {:?} was pushed again at {pos} without advancing",
                        m.rule_id
                    );
                    stack = stack.pop();
                    tokens.produce(&stack, line_len);
                    return Ok(stack);
                }
            }

            advance(&mut pos, &mut is_first_line, m.end);
        }
    }
}

fn advance(pos: &mut usize, is_first_line: &mut bool, end: usize) {
    if end > *pos {
        *pos = end;
        *is_first_line = false;
    }
}

#[cfg(test)]
mod tests {
    use crate::grammar::{Grammar, GrammarOptions};
    use crate::test_utils::{TestRepository, format_tokens};

    fn grammar(json: &str) -> Grammar {
        TestRepository::default().grammar(json, GrammarOptions::new())
    }

    fn tokenize(grammar: &Grammar, line: &str) -> Vec<String> {
        let result = grammar.tokenize_line(line, None).unwrap();
        format_tokens(line, &result.tokens)
    }

    const COMMENTS: &str = r##"{
        "scopeName": "source.test",
        "patterns": [{ "begin": "#", "end": "$", "name": "comment.line" }]
    }"##;

    #[test]
    fn nested_captures_are_closed_by_offset() {
        let grammar = grammar(
            r#"{
                "scopeName": "source.test",
                "patterns": [{
                    "match": "(a(b))c",
                    "name": "m",
                    "captures": { "1": { "name": "outer" }, "2": { "name": "inner" } }
                }]
            }"#,
        );
        assert_eq!(
            tokenize(&grammar, "abc"),
            vec![
                "0..1 'a' source.test m outer",
                "1..2 'b' source.test m outer inner",
                "2..3 'c' source.test m",
            ]
        );
    }

    #[test]
    fn captures_with_patterns_are_tokenized_again() {
        let grammar = grammar(
            r#"{
                "scopeName": "source.test",
                "patterns": [{
                    "match": "(\\w+)=(\\w+)",
                    "name": "meta.assign",
                    "captures": {
                        "2": { "name": "value", "patterns": [{ "match": "\\d+", "name": "constant.numeric" }] }
                    }
                }]
            }"#,
        );
        assert_eq!(
            tokenize(&grammar, "a=x12"),
            vec![
                "0..2 'a=' source.test meta.assign",
                "2..3 'x' source.test meta.assign value",
                "3..5 '12' source.test meta.assign value constant.numeric",
            ]
        );
    }

    #[test]
    fn names_can_use_captured_text() {
        let grammar = grammar(
            r#"{
                "scopeName": "source.test",
                "patterns": [{ "match": "(\\w+)!", "name": "entity.$1" }]
            }"#,
        );
        assert_eq!(tokenize(&grammar, "go!"), vec!["0..3 'go!' source.test entity.go"]);
    }

    #[test]
    fn continuation_anchor_only_matches_where_the_rule_began() {
        let grammar = grammar(
            r#"{
                "scopeName": "source.test",
                "patterns": [{
                    "begin": "\\{",
                    "end": "\\}",
                    "name": "meta.block",
                    "patterns": [{ "match": "\\Ga", "name": "first.a" }, { "match": "a", "name": "other.a" }]
                }]
            }"#,
        );
        assert_eq!(
            tokenize(&grammar, "{aa}"),
            vec![
                "0..1 '{' source.test meta.block",
                "1..2 'a' source.test meta.block first.a",
                "2..3 'a' source.test meta.block other.a",
                "3..4 '}' source.test meta.block",
            ]
        );
    }

    #[test]
    fn begin_matching_the_line_end_anchors_the_next_line() {
        let grammar = grammar(
            r#"{
                "scopeName": "source.test",
                "patterns": [{ "begin": "@\\n", "end": "\\G(?=\\w)", "name": "meta.heredoc" }]
            }"#,
        );
        let first = grammar.tokenize_line("@", None).unwrap();
        assert_eq!(first.rule_stack.depth(), 1);
        let second = grammar.tokenize_line("abc", Some(&first.rule_stack)).unwrap();
        assert_eq!(second.rule_stack.depth(), 0);
        assert_eq!(format_tokens("abc", &second.tokens), vec!["0..3 'abc' source.test"]);
    }

    #[test]
    fn grammar_injections_apply_where_the_selector_matches() {
        let grammar = grammar(
            r##"{
                "scopeName": "source.test",
                "patterns": [{ "begin": "#", "end": "$", "name": "comment.line" }],
                "injections": {
                    "L:comment": { "patterns": [{ "match": "TODO", "name": "keyword.todo" }] }
                }
            }"##,
        );
        assert_eq!(
            tokenize(&grammar, "# TODO x"),
            vec![
                "0..1 '#' source.test comment.line",
                "1..2 ' ' source.test comment.line",
                "2..6 'TODO' source.test comment.line keyword.todo",
                "6..8 ' x' source.test comment.line",
            ]
        );
        assert_eq!(tokenize(&grammar, "TODO"), vec!["0..4 'TODO' source.test"]);
    }

    #[test]
    fn left_injections_win_ties() {
        let build = |selector: &str| {
            grammar(&format!(
                r#"{{
                    "scopeName": "source.test",
                    "patterns": [{{ "match": "ab", "name": "rule.ab" }}],
                    "injections": {{
                        "{selector}": {{ "patterns": [{{ "match": "a", "name": "injected.a" }}] }}
                    }}
                }}"#
            ))
        };

        assert_eq!(
            tokenize(&build("L:source.test"), "ab"),
            vec!["0..1 'a' source.test injected.a", "1..2 'b' source.test"]
        );
        assert_eq!(tokenize(&build("source.test"), "ab"), vec!["0..2 'ab' source.test rule.ab"]);
        assert_eq!(tokenize(&build("R:source.test"), "ab"), vec!["0..2 'ab' source.test rule.ab"]);
    }

    #[test]
    fn injector_grammars_are_pulled_from_the_repository() {
        let repository = TestRepository::default()
            .with_grammar(
                r#"{
                    "scopeName": "text.todo",
                    "injectionSelector": "L:comment",
                    "patterns": [{ "match": "TODO", "name": "keyword.todo" }]
                }"#,
            )
            .with_injection("source.test", "text.todo");
        let grammar = repository.grammar(COMMENTS, GrammarOptions::new());
        assert_eq!(
            tokenize(&grammar, "#TODO"),
            vec![
                "0..1 '#' source.test comment.line",
                "1..5 'TODO' source.test comment.line keyword.todo",
            ]
        );
    }

    #[test]
    fn external_includes_use_their_own_repository() {
        let repository = TestRepository::default().with_grammar(
            r##"{
                "scopeName": "source.inner",
                "patterns": [{ "include": "#number" }],
                "repository": { "number": { "match": "\\d+", "name": "constant.numeric.inner" } }
            }"##,
        );
        let grammar = repository.grammar(
            r#"{
                "scopeName": "source.test",
                "patterns": [{ "begin": "<", "end": ">", "name": "meta.embedded", "patterns": [{ "include": "source.inner" }] }]
            }"#,
            GrammarOptions::new(),
        );
        assert_eq!(
            tokenize(&grammar, "<1>"),
            vec![
                "0..1 '<' source.test meta.embedded",
                "1..2 '1' source.test meta.embedded constant.numeric.inner",
                "2..3 '>' source.test meta.embedded",
            ]
        );
    }

    #[test]
    fn captures_past_the_match_end_are_skipped() {
        let grammar = grammar(
            r#"{
                "scopeName": "source.test",
                "patterns": [{
                    "match": "a(?=.(x))",
                    "name": "m",
                    "captures": { "1": { "name": "ahead" } }
                }]
            }"#,
        );
        assert_eq!(
            tokenize(&grammar, "abx"),
            vec!["0..1 'a' source.test m", "1..3 'bx' source.test"]
        );
    }

    #[test]
    fn end_at_the_enter_position_keeps_the_rule() {
        let grammar = grammar(
            r#"{
                "scopeName": "source.test",
                "patterns": [{ "begin": "(?=x)", "end": "(?=x)", "name": "meta.block" }]
            }"#,
        );
        let first = grammar.tokenize_line("xy", None).unwrap();
        assert_eq!(first.rule_stack.depth(), 1);
        assert_eq!(format_tokens("xy", &first.tokens), vec!["0..2 'xy' source.test meta.block"]);

        let second = grammar.tokenize_line("xy", Some(&first.rule_stack)).unwrap();
        assert_eq!(second.rule_stack.depth(), 1);
        assert_eq!(format_tokens("xy", &second.tokens), vec!["0..2 'xy' source.test meta.block"]);
    }

    #[test]
    fn while_uses_the_text_captured_by_begin() {
        let grammar = grammar(
            r#"{
                "scopeName": "source.test",
                "patterns": [{
                    "begin": "^(>+)",
                    "while": "^\\1",
                    "name": "meta.quote",
                    "beginCaptures": { "0": { "name": "punctuation.begin" } },
                    "whileCaptures": { "0": { "name": "punctuation.continue" } }
                }]
            }"#,
        );
        let first = grammar.tokenize_line(">> a", None).unwrap();
        assert_eq!(
            format_tokens(">> a", &first.tokens),
            vec![
                "0..2 '>>' source.test meta.quote punctuation.begin",
                "2..4 ' a' source.test meta.quote",
            ]
        );

        let second = grammar.tokenize_line(">> b", Some(&first.rule_stack)).unwrap();
        assert_eq!(second.rule_stack.depth(), 1);
        assert_eq!(
            format_tokens(">> b", &second.tokens),
            vec![
                "0..2 '>>' source.test meta.quote punctuation.continue",
                "2..4 ' b' source.test meta.quote",
            ]
        );

        // `>` alone no longer continues the `>>` quote, a new one starts
        let third = grammar.tokenize_line("> c", Some(&second.rule_stack)).unwrap();
        assert_eq!(third.rule_stack.depth(), 1);
        assert_eq!(
            format_tokens("> c", &third.tokens),
            vec![
                "0..1 '>' source.test meta.quote punctuation.begin",
                "1..3 ' c' source.test meta.quote",
            ]
        );
    }

    #[test]
    fn generations_are_unique() {
        let a = super::next_generation();
        let b = super::next_generation();
        assert!(b > a);
    }
}
