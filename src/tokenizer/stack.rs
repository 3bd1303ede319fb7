use std::fmt;
use std::sync::Arc;

use crate::grammars::RuleId;
use crate::scope::ScopeList;

/// A position recorded during one tokenize call.
/// Positions recorded by previous calls read as `None`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct LineMark {
    generation: u64,
    pos: usize,
}

impl LineMark {
    fn new(generation: u64, pos: Option<usize>) -> Option<Self> {
        pos.map(|pos| Self { generation, pos })
    }

    fn get(mark: Option<Self>, generation: u64) -> Option<usize> {
        mark.filter(|m| m.generation == generation).map(|m| m.pos)
    }
}

struct StackFrame {
    parent: Option<StateStack>,
    /// Number of frames below this one
    depth: usize,
    rule_id: RuleId,
    /// Where the rule was entered on the line, to detect rules looping without advancing
    enter: Option<LineMark>,
    /// The `\G` position to restore when this frame is popped
    anchor: Option<LineMark>,
    /// The begin pattern matched up to the end of the line: `\G` applies at the start of the next one
    begin_captured_eol: bool,
    /// The end/while pattern with its back-references resolved
    end_rule: Option<String>,
    /// "name" scopes, applied to the begin/end delimiters
    name_scopes: ScopeList,
    /// "contentName" scopes, applied to everything between the delimiters
    content_scopes: ScopeList,
}

/// Keeps track of nested context as well as how to exit that context.
///
/// This is the state carried from one line to the next. Frames are immutable and shared:
/// pushing or updating the top creates a new frame pointing to the same parent.
#[derive(Clone)]
pub struct StateStack(Arc<StackFrame>);

impl StateStack {
    pub(crate) fn root(rule_id: RuleId, scopes: ScopeList) -> Self {
        Self(Arc::new(StackFrame {
            parent: None,
            depth: 0,
            rule_id,
            enter: None,
            anchor: None,
            begin_captured_eol: false,
            end_rule: None,
            name_scopes: scopes.clone(),
            content_scopes: scopes,
        }))
    }

    /// Called when entering a nested context: when a begin pattern matches, or to tokenize
    /// a capture again
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn push(
        &self,
        rule_id: RuleId,
        generation: u64,
        enter_pos: usize,
        anchor_pos: Option<usize>,
        begin_captured_eol: bool,
        name_scopes: ScopeList,
        content_scopes: ScopeList,
    ) -> Self {
        Self(Arc::new(StackFrame {
            parent: Some(self.clone()),
            depth: self.0.depth + 1,
            rule_id,
            enter: LineMark::new(generation, Some(enter_pos)),
            anchor: LineMark::new(generation, anchor_pos),
            begin_captured_eol,
            end_rule: None,
            name_scopes,
            content_scopes,
        }))
    }

    fn with(&self, end_rule: Option<String>, content_scopes: ScopeList) -> Self {
        let frame = &self.0;
        Self(Arc::new(StackFrame {
            parent: frame.parent.clone(),
            depth: frame.depth,
            rule_id: frame.rule_id,
            enter: frame.enter,
            anchor: frame.anchor,
            begin_captured_eol: frame.begin_captured_eol,
            end_rule,
            name_scopes: frame.name_scopes.clone(),
            content_scopes,
        }))
    }

    pub(crate) fn with_content_scopes(&self, content_scopes: ScopeList) -> Self {
        if self.0.content_scopes == content_scopes {
            return self.clone();
        }
        self.with(self.0.end_rule.clone(), content_scopes)
    }

    pub(crate) fn with_end_rule(&self, end_rule: String) -> Self {
        if self.0.end_rule.as_deref() == Some(end_rule.as_str()) {
            return self.clone();
        }
        self.with(Some(end_rule), self.0.content_scopes.clone())
    }

    pub fn parent(&self) -> Option<&StateStack> {
        self.0.parent.as_ref()
    }

    /// Exits the current context, getting back to the parent.
    /// The root is never popped.
    pub fn pop(&self) -> StateStack {
        self.parent().unwrap_or(self).clone()
    }

    /// Number of contexts entered since the grammar root, 0 for the root itself
    pub fn depth(&self) -> usize {
        self.0.depth
    }

    pub fn rule_id(&self) -> RuleId {
        self.0.rule_id
    }

    pub fn end_rule(&self) -> Option<&str> {
        self.0.end_rule.as_deref()
    }

    pub fn name_scopes(&self) -> &ScopeList {
        &self.0.name_scopes
    }

    pub fn content_scopes(&self) -> &ScopeList {
        &self.0.content_scopes
    }

    pub(crate) fn begin_captured_eol(&self) -> bool {
        self.0.begin_captured_eol
    }

    pub(crate) fn enter_pos(&self, generation: u64) -> Option<usize> {
        LineMark::get(self.0.enter, generation)
    }

    pub(crate) fn anchor_pos(&self, generation: u64) -> Option<usize> {
        LineMark::get(self.0.anchor, generation)
    }

    /// Whether `other` re-enters a rule already entered at the same position by one of the
    /// frames of `self`
    pub(crate) fn has_same_rule_as(&self, other: &StateStack, generation: u64) -> bool {
        let enter = other.enter_pos(generation);
        let mut node = Some(self);
        while let Some(frame) = node {
            if frame.enter_pos(generation) != enter {
                break;
            }
            if frame.rule_id() == other.rule_id() {
                return true;
            }
            node = frame.parent();
        }
        false
    }
}

impl PartialEq for StateStack {
    fn eq(&self, other: &Self) -> bool {
        if self.depth() != other.depth() {
            return false;
        }
        let mut a = Some(self);
        let mut b = Some(other);
        while let (Some(x), Some(y)) = (a, b) {
            if Arc::ptr_eq(&x.0, &y.0) {
                return true;
            }
            if x.rule_id() != y.rule_id()
                || x.end_rule() != y.end_rule()
                || x.content_scopes() != y.content_scopes()
            {
                return false;
            }
            a = x.parent();
            b = y.parent();
        }
        true
    }
}

impl Eq for StateStack {}

impl fmt::Debug for StateStack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "StateStack:")?;

        let mut frames = Vec::new();
        let mut node = Some(self);
        while let Some(frame) = node {
            frames.push(frame);
            node = frame.parent();
        }

        for frame in frames.into_iter().rev() {
            let indent = "  ".repeat(frame.depth());
            write!(
                f,
                "{indent}rule={}, name=[{:?}], content=[{:?}]",
                *frame.rule_id(),
                frame.name_scopes(),
                frame.content_scopes()
            )?;
            if let Some(pattern) = frame.end_rule() {
                write!(f, ", end_rule=\"{}\"", pattern)?;
            }
            if frame.begin_captured_eol() {
                write!(f, ", begin_captured_eol")?;
            }
            writeln!(f)?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::scope_metadata::ScopeMetadataProvider;
    use crate::themes::Theme;

    fn scopes(provider: &ScopeMetadataProvider, names: &[&str]) -> ScopeList {
        let mut list = ScopeList::root(names[0], provider);
        for name in &names[1..] {
            list = list.push(provider, Some(name));
        }
        list
    }

    fn provider() -> ScopeMetadataProvider {
        ScopeMetadataProvider::new(0, Arc::new(Theme::default()), &HashMap::new())
    }

    #[test]
    fn push_and_pop_share_frames() {
        let provider = provider();
        let root_scopes = scopes(&provider, &["source.test"]);
        let root = StateStack::root(RuleId(0), root_scopes.clone());
        assert_eq!(root.depth(), 0);

        let inner = scopes(&provider, &["source.test", "meta.block"]);
        let pushed = root.push(RuleId(3), 1, 0, None, false, inner.clone(), inner.clone());
        assert_eq!(pushed.depth(), 1);
        assert_eq!(pushed.pop(), root);
        assert!(Arc::ptr_eq(&pushed.pop().0, &root.0));
        // root is never popped
        assert_eq!(root.pop(), root);

        let same = pushed.with_content_scopes(inner.clone());
        assert!(Arc::ptr_eq(&same.0, &pushed.0));
        let with_end = pushed.with_end_rule("\\)".to_string());
        assert_eq!(with_end.end_rule(), Some("\\)"));
        assert_eq!(pushed.end_rule(), None);
        assert_ne!(with_end, pushed);
    }

    #[test]
    fn structural_equality() {
        let provider = provider();
        let build = |rule: u32, end: Option<&str>, scope: &str| {
            let root = StateStack::root(RuleId(0), scopes(&provider, &["source.test"]));
            let list = scopes(&provider, &["source.test", scope]);
            let pushed = root.push(RuleId(rule), 7, 3, Some(1), false, list.clone(), list);
            match end {
                Some(end) => pushed.with_end_rule(end.to_string()),
                None => pushed,
            }
        };

        // positions of the current line don't matter
        let a = build(1, None, "meta.a");
        let other_line = {
            let root = StateStack::root(RuleId(0), scopes(&provider, &["source.test"]));
            let list = scopes(&provider, &["source.test", "meta.a"]);
            root.push(RuleId(1), 8, 0, None, true, list.clone(), list)
        };
        assert_eq!(a, other_line);
        assert_eq!(a, build(1, None, "meta.a"));
        assert_ne!(a, build(2, None, "meta.a"));
        assert_ne!(a, build(1, Some("x"), "meta.a"));
        assert_ne!(a, build(1, None, "meta.b"));
        assert_ne!(a, a.pop());
    }

    #[test]
    fn line_positions_expire_with_the_generation() {
        let provider = provider();
        let list = scopes(&provider, &["source.test"]);
        let root = StateStack::root(RuleId(0), list.clone());
        let pushed = root.push(RuleId(1), 5, 2, Some(1), false, list.clone(), list);
        assert_eq!(pushed.enter_pos(5), Some(2));
        assert_eq!(pushed.anchor_pos(5), Some(1));
        assert_eq!(pushed.enter_pos(6), None);
        assert_eq!(pushed.anchor_pos(6), None);
    }

    #[test]
    fn detects_same_rule_entered_at_same_position() {
        let provider = provider();
        let list = scopes(&provider, &["source.test"]);
        let root = StateStack::root(RuleId(0), list.clone());
        let first = root.push(RuleId(1), 9, 4, None, false, list.clone(), list.clone());
        let again = first.push(RuleId(1), 9, 4, None, false, list.clone(), list.clone());
        assert!(first.has_same_rule_as(&again, 9));

        let other_rule = first.push(RuleId(2), 9, 4, None, false, list.clone(), list.clone());
        assert!(!first.has_same_rule_as(&other_rule, 9));

        let later = first.push(RuleId(1), 9, 5, None, false, list.clone(), list);
        assert!(!first.has_same_rule_as(&later, 9));
    }
}
