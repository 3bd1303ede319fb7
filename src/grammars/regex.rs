use std::fmt;
use std::sync::LazyLock;

use onig::{Captures, Regex};

use crate::grammars::RuleId;
use crate::grammars::anchors::AnchorActive;

/// `\z` is not supported the way TextMate grammars expect it: it should match at the end
/// of the line, before the `\n` we append
const END_OF_LINE_ASSERTION: &str = r"$(?!\n)(?<!\n)";

/// One pattern of a rule along with what we learnt about it.
///
/// Patterns with `\A` or `\G` get a rewritten variant per anchor context, computed once.
#[derive(Clone)]
pub(crate) struct RegexSource {
    source: String,
    rule_id: RuleId,
    has_anchor: bool,
    has_back_references: bool,
    anchor_cache: Option<Box<[String; 4]>>,
}

impl RegexSource {
    pub fn new(source: &str, rule_id: RuleId) -> Self {
        let (source, has_anchor) = handle_anchors(source);
        let has_back_references = has_back_references(&source);
        let mut out = Self {
            source,
            rule_id,
            has_anchor,
            has_back_references,
            anchor_cache: None,
        };
        out.build_anchor_cache();
        out
    }

    fn build_anchor_cache(&mut self) {
        self.anchor_cache = if self.has_anchor {
            Some(Box::new(AnchorActive::ALL.map(|a| {
                // ALL is ordered by index
                a.replace_anchors(&self.source)
            })))
        } else {
            None
        };
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn rule_id(&self) -> RuleId {
        self.rule_id
    }

    pub fn has_anchor(&self) -> bool {
        self.has_anchor
    }

    pub fn has_back_references(&self) -> bool {
        self.has_back_references
    }

    /// Replaces the pattern, keeping the anchor and back-reference flags of the original.
    pub fn set_source(&mut self, source: &str) {
        if self.source == source {
            return;
        }
        self.source = source.to_string();
        self.build_anchor_cache();
    }

    pub fn resolve_anchors(&self, anchors: AnchorActive) -> &str {
        match &self.anchor_cache {
            Some(cache) => &cache[anchors.index()],
            None => &self.source,
        }
    }

    /// Replaces each `\N` with the (escaped) text captured by group N of a previous match.
    /// Groups that did not participate resolve to an empty string.
    pub fn resolve_back_references(&self, line: &str, captures: &[Option<(usize, usize)>]) -> String {
        let bytes = self.source.as_bytes();
        let mut out = String::with_capacity(self.source.len());
        let mut last = 0;
        let mut i = 0;
        while i < bytes.len() {
            if bytes[i] != b'\\' {
                i += 1;
                continue;
            }
            let digits_start = i + 1;
            let mut digits_end = digits_start;
            while digits_end < bytes.len() && bytes[digits_end].is_ascii_digit() {
                digits_end += 1;
            }
            if digits_end == digits_start {
                // some other escape, skip the escaped char
                i += 2;
                continue;
            }

            out.push_str(&self.source[last..i]);
            let group: usize = self.source[digits_start..digits_end].parse().unwrap_or(0);
            if let Some(Some((start, end))) = captures.get(group)
                && let Some(text) = line.get(*start..*end)
            {
                out.push_str(&escape_regex(text));
            }
            last = digits_end;
            i = digits_end;
        }
        out.push_str(&self.source[last..]);
        out
    }
}

impl fmt::Debug for RegexSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} => {}", self.rule_id, self.source)
    }
}

/// Rewrites `\z` and reports whether the pattern uses `\A` or `\G`.
fn handle_anchors(source: &str) -> (String, bool) {
    let mut out = String::with_capacity(source.len());
    let mut has_anchor = false;
    let mut chars = source.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('z') => out.push_str(END_OF_LINE_ASSERTION),
            Some(next) => {
                if next == 'A' || next == 'G' {
                    has_anchor = true;
                }
                out.push('\\');
                out.push(next);
            }
            None => out.push('\\'),
        }
    }
    (out, has_anchor)
}

fn has_back_references(source: &str) -> bool {
    let mut chars = source.chars();
    while let Some(c) = chars.next() {
        if c == '\\'
            && let Some(next) = chars.next()
            && next.is_ascii_digit()
        {
            return true;
        }
    }
    false
}

/// Escapes everything that would be interpreted by the regex engine
pub(crate) fn escape_regex(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if c.is_whitespace() || "-\\{}*+?|^$.,[]()#".contains(c) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

static CAPTURING_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$(\d+)|\$\{(\d+):\/(downcase|upcase)\}").expect("Invalid capture name regex")
});

/// Whether a rule name references captured groups, eg `entity.name.$1`
pub(crate) fn has_captures(name: &str) -> bool {
    CAPTURING_REGEX.find(name).is_some()
}

/// Replaces `$N` and `${N:/downcase}` style references in a rule name with the captured text.
/// References to groups that did not participate are left untouched.
pub(crate) fn replace_captures(name: &str, line: &str, captures: &[Option<(usize, usize)>]) -> String {
    CAPTURING_REGEX.replace_all(name, |caps: &Captures| {
        let whole = caps.at(0).unwrap_or_default();
        let index = caps.at(1).or_else(|| caps.at(2)).and_then(|s| s.parse::<usize>().ok());
        let Some(Some((start, end))) = index.and_then(|i| captures.get(i)) else {
            return whole.to_string();
        };
        let Some(mut text) = line.get(*start..*end) else {
            return whole.to_string();
        };
        text = text.trim_start_matches('.');
        match caps.at(3) {
            Some("downcase") => text.to_lowercase(),
            Some("upcase") => text.to_uppercase(),
            _ => text.to_string(),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rewrites_end_of_line_anchor() {
        let src = RegexSource::new(r"foo\z", RuleId(1));
        assert_eq!(src.source(), r"foo$(?!\n)(?<!\n)");
        assert!(!src.has_anchor());

        // only the very end of a text that has no trailing newline
        let re = Regex::new(src.source()).unwrap();
        assert!(re.find("a foo").is_some());
        assert!(re.find("a foo\n").is_none());
        assert!(re.find("a foo bar").is_none());
    }

    #[test]
    fn detects_anchors_and_back_references() {
        let src = RegexSource::new(r"\G\s*(\w+)", RuleId(1));
        assert!(src.has_anchor());
        assert!(!src.has_back_references());
        assert_eq!(src.resolve_anchors(AnchorActive::AG), r"\G\s*(\w+)");
        assert_eq!(src.resolve_anchors(AnchorActive::A), "\\\u{FFFF}\\s*(\\w+)");

        let src = RegexSource::new(r"^\s*\1\b", RuleId(1));
        assert!(src.has_back_references());
        assert!(!src.has_anchor());
        // an escaped backslash is not a back-reference
        assert!(!RegexSource::new(r"\\1", RuleId(1)).has_back_references());
    }

    #[test]
    fn disabled_absolute_start_never_matches() {
        let src = RegexSource::new(r"\Aabc", RuleId(1));
        let enabled = Regex::new(src.resolve_anchors(AnchorActive::A)).unwrap();
        let disabled = Regex::new(src.resolve_anchors(AnchorActive::None)).unwrap();
        assert!(enabled.find("abc\n").is_some());
        assert!(disabled.find("abc\n").is_none());
        assert!(disabled.find("abcabc\n").is_none());
    }

    #[test]
    fn resolves_back_references_with_escaping() {
        let src = RegexSource::new(r"\1(\2)\3", RuleId(1));
        let line = "a.b+ x";
        let captures = vec![Some((0, 6)), Some((0, 4)), None];
        assert_eq!(src.resolve_back_references(line, &captures), r"a\.b\+()");
    }

    #[test]
    fn set_source_rebuilds_anchor_variants() {
        let mut src = RegexSource::new(r"\G(x)", RuleId(1));
        src.set_source(r"\Gy");
        assert_eq!(src.source(), r"\Gy");
        assert_eq!(src.resolve_anchors(AnchorActive::None), "\\\u{FFFF}y");
    }

    #[test]
    fn escapes_regex_metacharacters() {
        assert_eq!(escape_regex("a.b*c d"), r"a\.b\*c\ d");
        assert_eq!(escape_regex("plain"), "plain");
        assert_eq!(escape_regex("#{}"), r"\#\{\}");
    }

    #[test]
    fn replaces_name_captures() {
        let line = "def .Foo bar";
        let captures = vec![Some((0, 12)), Some((4, 8)), Some((9, 12)), None];
        assert!(has_captures("entity.name.$1"));
        assert!(!has_captures("entity.name"));
        assert_eq!(
            replace_captures("entity.name.$1.${2:/upcase}", line, &captures),
            "entity.name.Foo.BAR"
        );
        assert_eq!(
            replace_captures("x.${1:/downcase}", line, &captures),
            "x.foo"
        );
        // missing group
        assert_eq!(replace_captures("x.$3.$9", line, &captures), "x.$3.$9");
    }
}
