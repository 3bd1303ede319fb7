//! TextMate grammar injection selector parsing and matching.

use crate::grammars::RuleId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InjectionPrecedence {
    Left,  // L: prefix
    Right, // R: prefix
}

/// A parsed comma-separated part of an injection selector
#[derive(Debug, Clone, PartialEq)]
pub struct InjectionSelector {
    matcher: SelectorMatcher,
    precedence: Option<InjectionPrecedence>,
}

impl InjectionSelector {
    pub fn matcher(&self) -> &SelectorMatcher {
        &self.matcher
    }

    pub fn precedence(&self) -> Option<InjectionPrecedence> {
        self.precedence
    }
}

/// Selector matcher that can evaluate against scope stacks
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelectorMatcher {
    /// Space-separated scopes that must be found in that order, eg `source.js comment`
    Path(Vec<String>),
    /// All matchers must succeed
    And(Vec<SelectorMatcher>),
    /// Any matcher can succeed (`|` or `,` separated)
    Or(Vec<SelectorMatcher>),
    /// Matcher must NOT succeed (`-` prefix)
    Not(Box<SelectorMatcher>),
}

/// `scope` is `selector` or one of its descendants: `a.b.c` is matched by `a.b` but not by `a.b.c.d`.
pub(crate) fn scope_matches(scope: &str, selector: &str) -> bool {
    scope == selector
        || (scope.len() > selector.len()
            && scope.starts_with(selector)
            && scope.as_bytes()[selector.len()] == b'.')
}

impl SelectorMatcher {
    /// `scopes` goes from the root to the innermost scope
    pub fn matches(&self, scopes: &[&str]) -> bool {
        match self {
            SelectorMatcher::Path(path) => {
                if scopes.len() < path.len() {
                    return false;
                }
                let mut next = 0;
                path.iter().all(|selector| {
                    match scopes[next..].iter().position(|s| scope_matches(s, selector)) {
                        Some(offset) => {
                            next += offset + 1;
                            true
                        }
                        None => false,
                    }
                })
            }
            SelectorMatcher::And(matchers) => matchers.iter().all(|m| m.matches(scopes)),
            SelectorMatcher::Or(matchers) => matchers.iter().any(|m| m.matches(scopes)),
            SelectorMatcher::Not(matcher) => !matcher.matches(scopes),
        }
    }
}

/// An injected rule and where it applies.
#[derive(Debug, Clone)]
pub(crate) struct Injection {
    pub matcher: SelectorMatcher,
    pub rule_id: RuleId,
    /// `L:` injections win ties against the grammar's own patterns
    pub priority_match: bool,
    precedence: Option<InjectionPrecedence>,
}

impl Injection {
    pub fn new(selector: InjectionSelector, rule_id: RuleId) -> Self {
        Self {
            priority_match: selector.precedence == Some(InjectionPrecedence::Left),
            matcher: selector.matcher,
            precedence: selector.precedence,
            rule_id,
        }
    }

    /// Sort key: left injections first, right injections last
    pub fn priority(&self) -> i8 {
        match self.precedence {
            Some(InjectionPrecedence::Left) => -1,
            None => 0,
            Some(InjectionPrecedence::Right) => 1,
        }
    }
}

fn is_identifier_start(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '.' || c == ':'
}

fn is_identifier_char(c: char) -> bool {
    is_identifier_start(c) || c == '-' || c == '*'
}

/// Splits a selector into `L:`/`R:` prefixes, scope names and the `,|-()` operators.
/// Anything else is skipped.
fn tokenize(selector: &str) -> Vec<&str> {
    let mut tokens = Vec::new();
    let mut chars = selector.char_indices().peekable();

    while let Some((start, c)) = chars.next() {
        if (c == 'L' || c == 'R') && selector[start + 1..].starts_with(':') {
            chars.next();
            tokens.push(&selector[start..start + 2]);
        } else if is_identifier_start(c) {
            let mut end = start + c.len_utf8();
            while let Some((i, next)) = chars.peek().copied() {
                if !is_identifier_char(next) {
                    break;
                }
                end = i + next.len_utf8();
                chars.next();
            }
            tokens.push(&selector[start..end]);
        } else if ",|-()".contains(c) {
            tokens.push(&selector[start..start + 1]);
        }
    }

    tokens
}

fn is_identifier(s: &str) -> bool {
    s.starts_with(is_identifier_start) && !matches!(s, "L:" | "R:")
}

/// `meta.tag.*.html` is treated as `meta.tag`
fn scope_name(token: &str) -> &str {
    match token.find(".*") {
        Some(pos) => token[..pos].trim_end_matches('.'),
        None => token,
    }
}

fn parse_inner_expression(tokens: &[&str], position: &mut usize) -> SelectorMatcher {
    let mut out = Vec::new();
    while let Some(m) = parse_conjunction(tokens, position) {
        if !out.contains(&m) {
            out.push(m);
        }
        if *position < tokens.len() && matches!(tokens[*position], "|" | ",") {
            *position += 1;
        } else {
            break;
        }
    }

    if out.len() == 1 {
        out.remove(0)
    } else {
        SelectorMatcher::Or(out)
    }
}

fn parse_operand(tokens: &[&str], position: &mut usize) -> Option<SelectorMatcher> {
    if *position >= tokens.len() {
        return None;
    }

    match tokens[*position] {
        "-" => {
            *position += 1;
            let negated = parse_operand(tokens, position)?;
            Some(SelectorMatcher::Not(Box::new(negated)))
        }
        "(" => {
            *position += 1;
            let inner = parse_inner_expression(tokens, position);
            if *position < tokens.len() && tokens[*position] == ")" {
                *position += 1;
            }
            Some(inner)
        }
        _ => {
            let mut path = Vec::new();
            while *position < tokens.len() && is_identifier(tokens[*position]) {
                path.push(scope_name(tokens[*position]).to_string());
                *position += 1;
            }
            if path.is_empty() {
                None
            } else {
                Some(SelectorMatcher::Path(path))
            }
        }
    }
}

fn parse_conjunction(tokens: &[&str], position: &mut usize) -> Option<SelectorMatcher> {
    let mut matchers = Vec::new();

    while let Some(m) = parse_operand(tokens, position) {
        matchers.push(m);
    }

    match matchers.len() {
        0 => None,
        1 => matchers.pop(),
        _ => Some(SelectorMatcher::And(matchers)),
    }
}

/// Parse injection selector string into compiled matchers
pub fn parse_injection_selector(selector: &str) -> Vec<InjectionSelector> {
    let tokens = tokenize(selector.trim());
    let mut position = 0;
    let mut res = Vec::new();

    let mut precedence = None;
    while position < tokens.len() {
        match tokens[position] {
            "L:" => {
                precedence = Some(InjectionPrecedence::Left);
                position += 1;
                continue;
            }
            "R:" => {
                precedence = Some(InjectionPrecedence::Right);
                position += 1;
                continue;
            }
            _ => (),
        };

        let Some(matcher) = parse_conjunction(&tokens, &mut position) else {
            break;
        };
        res.push(InjectionSelector {
            matcher,
            precedence,
        });
        precedence = None;
        if position < tokens.len() && tokens[position] == "," {
            position += 1;
        } else {
            break;
        }
    }

    res
}

#[cfg(test)]
mod tests {
    use super::*;
    use insta::assert_debug_snapshot;

    #[test]
    fn tokenizes_selectors() {
        assert_eq!(
            tokenize("L:(meta.a | b.c-d) -comment, R:x.*.y"),
            vec!["L:", "(", "meta.a", "|", "b.c-d", ")", "-", "comment", ",", "R:", "x.*.y"]
        );
        assert_eq!(tokenize("Lx:a"), vec!["Lx:a"]);
    }

    #[test]
    fn parses_simple_selectors() {
        assert_debug_snapshot!(parse_injection_selector("L:text.html -comment"), @r#"
        [
            InjectionSelector {
                matcher: And(
                    [
                        Path(
                            [
                                "text.html",
                            ],
                        ),
                        Not(
                            Path(
                                [
                                    "comment",
                                ],
                            ),
                        ),
                    ],
                ),
                precedence: Some(
                    Left,
                ),
            },
        ]
        "#);
    }

    #[test]
    fn parses_several_selectors() {
        assert_debug_snapshot!(
            parse_injection_selector("source.js string, R:(meta.a | meta.tag.*.html)"),
            @r#"
        [
            InjectionSelector {
                matcher: Path(
                    [
                        "source.js",
                        "string",
                    ],
                ),
                precedence: None,
            },
            InjectionSelector {
                matcher: Or(
                    [
                        Path(
                            [
                                "meta.a",
                            ],
                        ),
                        Path(
                            [
                                "meta.tag",
                            ],
                        ),
                    ],
                ),
                precedence: Some(
                    Right,
                ),
            },
        ]
        "#
        );
    }

    #[test]
    fn path_matches_ancestors_in_order() {
        let selector = &parse_injection_selector("source.js comment")[0];
        let matcher = selector.matcher();
        assert!(matcher.matches(&["source.js", "meta.block", "comment.line.js"]));
        assert!(!matcher.matches(&["comment.line.js", "source.js"]));
        assert!(!matcher.matches(&["source.jsx", "comment"]));
        // a matched scope can't be used twice
        let twice = &parse_injection_selector("source.js source.js")[0];
        assert!(!twice.matcher().matches(&["source.js", "comment"]));
        assert!(twice.matcher().matches(&["source.js", "source.js.embedded"]));
    }

    #[test]
    fn negation_and_alternatives() {
        let selector = &parse_injection_selector("L:source.js -(string | comment)")[0];
        assert_eq!(selector.precedence(), Some(InjectionPrecedence::Left));
        assert!(selector.matcher().matches(&["source.js", "meta.block"]));
        assert!(!selector.matcher().matches(&["source.js", "string.quoted"]));
        assert!(!selector.matcher().matches(&["source.js", "comment.line"]));
        assert!(!selector.matcher().matches(&["source.ts"]));
    }

    #[test]
    fn injection_priority() {
        let mut injections: Vec<Injection> = parse_injection_selector("R:a, b, L:c")
            .into_iter()
            .map(|s| Injection::new(s, RuleId(1)))
            .collect();
        injections.sort_by_key(|i| i.priority());
        let priority: Vec<_> = injections.iter().map(|i| i.priority_match).collect();
        assert_eq!(priority, vec![true, false, false]);
        assert_eq!(injections[2].priority(), 1);
    }

    #[test]
    fn empty_selector() {
        assert!(parse_injection_selector("   ").is_empty());
    }
}
