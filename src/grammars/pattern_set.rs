use std::fmt::{Debug, Formatter};
use std::sync::Arc;

use onig::{RegSet, RegexOptions, SearchOptions};

use crate::error::{Error, TintaResult};
use crate::grammars::RuleId;
use crate::grammars::anchors::AnchorActive;
use crate::grammars::regex::RegexSource;

#[derive(Debug, PartialEq, Eq, Clone)]
pub(crate) struct PatternSetMatch {
    /// The rule owning the pattern that matched, or one of the end/while sentinels
    pub rule_id: RuleId,
    pub start: usize,
    pub end: usize,
    pub capture_pos: Vec<Option<(usize, usize)>>,
}

/// An eagerly compiled pattern set for efficient batch regex matching using onig RegSet
pub(crate) struct PatternSet {
    rule_ids: Vec<RuleId>,
    patterns: Vec<String>,
    regset: Option<RegSet>,
}

impl PatternSet {
    pub fn new(items: Vec<(RuleId, String)>) -> TintaResult<Self> {
        if items.is_empty() {
            return Ok(Self {
                rule_ids: Vec::new(),
                patterns: Vec::new(),
                regset: None,
            });
        }

        let (rule_ids, patterns): (Vec<_>, Vec<_>) = items.into_iter().unzip();
        let pattern_strs: Vec<&str> = patterns.iter().map(|s| s.as_str()).collect();

        let regset = RegSet::with_options(&pattern_strs, RegexOptions::REGEX_OPTION_CAPTURE_GROUP)
            .map_err(|e| {
                Error::TokenizeRegex(format!(
                    "failed to compile pattern set with {} patterns: {}",
                    pattern_strs.len(),
                    e
                ))
            })?;

        Ok(Self {
            rule_ids,
            patterns,
            regset: Some(regset),
        })
    }

    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }

    /// Finds the leftmost match starting at `pos` or later.
    /// When several patterns match at the same position, the first one in the set wins.
    pub(crate) fn find_at(&self, text: &str, pos: usize) -> Option<PatternSetMatch> {
        let regset = self.regset.as_ref()?;

        // We need to specify pos/text.len() because some regex might do lookbehind
        let (pattern_index, captures) = regset.captures_with_options(
            text,
            pos,
            text.len(),
            onig::RegSetLead::Position,
            SearchOptions::SEARCH_OPTION_NONE,
        )?;
        let (start, end) = captures.pos(0)?;
        let capture_pos: Vec<Option<(usize, usize)>> =
            (0..captures.len()).map(|i| captures.pos(i)).collect();

        Some(PatternSetMatch {
            rule_id: *self.rule_ids.get(pattern_index)?,
            start,
            end,
            capture_pos,
        })
    }
}

impl Debug for PatternSet {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "PatternSet({} rules)", self.rule_ids.len())?;
        for (rule_id, pattern) in self.rule_ids.iter().zip(&self.patterns) {
            writeln!(f, "  - {rule_id:?}: {pattern}")?;
        }
        Ok(())
    }
}

/// The ordered patterns of a rule, compiled lazily in each anchor context they need.
///
/// Changing one of the sources, as happens for end/while patterns with back-references,
/// drops every compiled variant.
#[derive(Debug, Default)]
pub(crate) struct RegexSourceList {
    items: Vec<RegexSource>,
    has_anchors: bool,
    cached: Option<Arc<PatternSet>>,
    anchor_cache: [Option<Arc<PatternSet>>; 4],
}

impl RegexSourceList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, item: RegexSource) {
        self.has_anchors = self.has_anchors || item.has_anchor();
        self.items.push(item);
    }

    pub fn unshift(&mut self, item: RegexSource) {
        self.has_anchors = self.has_anchors || item.has_anchor();
        self.items.insert(0, item);
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn set_source(&mut self, index: usize, source: &str) {
        let Some(item) = self.items.get_mut(index) else {
            return;
        };
        if item.source() == source {
            return;
        }
        self.cached = None;
        self.anchor_cache = Default::default();
        item.set_source(source);
    }

    pub fn compile(&mut self, anchors: AnchorActive) -> TintaResult<Arc<PatternSet>> {
        if !self.has_anchors {
            if let Some(set) = &self.cached {
                return Ok(set.clone());
            }
            let set = Arc::new(self.build(|item| item.source().to_string())?);
            self.cached = Some(set.clone());
            return Ok(set);
        }

        let slot = anchors.index();
        if let Some(set) = &self.anchor_cache[slot] {
            return Ok(set.clone());
        }
        let set = Arc::new(self.build(|item| item.resolve_anchors(anchors).to_string())?);
        self.anchor_cache[slot] = Some(set.clone());
        Ok(set)
    }

    fn build(&self, source: impl Fn(&RegexSource) -> String) -> TintaResult<PatternSet> {
        PatternSet::new(
            self.items
                .iter()
                .map(|item| (item.rule_id(), source(item)))
                .collect(),
        )
    }
}
