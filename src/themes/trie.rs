use std::cmp::Ordering;
use std::collections::HashMap;

use crate::themes::FontStyle;

/// A style attached to a trie node, optionally conditioned on ancestor scopes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThemeTrieElementRule {
    pub scope_depth: usize,
    /// Ancestor selectors, nearest first. `None` for an unconditioned rule.
    pub parent_scopes: Option<Vec<String>>,
    pub font_style: Option<FontStyle>,
    /// Color id, 0 when unset
    pub foreground: u16,
    /// Color id, 0 when unset
    pub background: u16,
}

impl ThemeTrieElementRule {
    pub fn new(
        scope_depth: usize,
        parent_scopes: Option<Vec<String>>,
        font_style: Option<FontStyle>,
        foreground: u16,
        background: u16,
    ) -> Self {
        Self {
            scope_depth,
            parent_scopes,
            font_style,
            foreground,
            background,
        }
    }

    fn accept_overwrite(
        &mut self,
        scope_depth: usize,
        font_style: Option<FontStyle>,
        foreground: u16,
        background: u16,
    ) {
        self.scope_depth = self.scope_depth.max(scope_depth);
        if font_style.is_some() {
            self.font_style = font_style;
        }
        if foreground != 0 {
            self.foreground = foreground;
        }
        if background != 0 {
            self.background = background;
        }
    }
}

/// Lexicographic, with `None` first and shorter lists first.
pub(crate) fn cmp_scope_lists(a: Option<&[String]>, b: Option<&[String]>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(a), Some(b)) => a.len().cmp(&b.len()).then_with(|| a.cmp(b)),
    }
}

fn split_head(scope: &str) -> (&str, &str) {
    scope.split_once('.').unwrap_or((scope, ""))
}

#[derive(Debug, Clone)]
pub(crate) struct ThemeTrieElement {
    main_rule: ThemeTrieElementRule,
    rules_with_parent_scopes: Vec<ThemeTrieElementRule>,
    children: HashMap<String, ThemeTrieElement>,
}

impl ThemeTrieElement {
    pub fn new(main_rule: ThemeTrieElementRule) -> Self {
        Self {
            main_rule,
            rules_with_parent_scopes: Vec::new(),
            children: HashMap::new(),
        }
    }

    /// The candidate rules for that scope, most specific first.
    pub fn find(&self, scope: &str) -> Vec<ThemeTrieElementRule> {
        if !scope.is_empty() {
            let (head, tail) = split_head(scope);
            if let Some(child) = self.children.get(head) {
                return child.find(tail);
            }
        }

        let mut rules = Vec::with_capacity(1 + self.rules_with_parent_scopes.len());
        rules.push(self.main_rule.clone());
        rules.extend(self.rules_with_parent_scopes.iter().cloned());
        // stable: declaration order is kept among equally specific rules
        rules.sort_by(|a, b| {
            b.scope_depth.cmp(&a.scope_depth).then_with(|| {
                let a_len = a.parent_scopes.as_ref().map_or(0, |p| p.len());
                let b_len = b.parent_scopes.as_ref().map_or(0, |p| p.len());
                b_len.cmp(&a_len)
            })
        });
        rules
    }

    pub fn insert(
        &mut self,
        scope_depth: usize,
        scope: &str,
        parent_scopes: Option<&[String]>,
        font_style: Option<FontStyle>,
        foreground: u16,
        background: u16,
    ) {
        if scope.is_empty() {
            self.insert_here(scope_depth, parent_scopes, font_style, foreground, background);
            return;
        }

        let (head, tail) = split_head(scope);
        let child = match self.children.get_mut(head) {
            Some(child) => child,
            None => {
                // a new child starts with everything known about its parent
                let child = ThemeTrieElement {
                    main_rule: self.main_rule.clone(),
                    rules_with_parent_scopes: self.rules_with_parent_scopes.clone(),
                    children: HashMap::new(),
                };
                self.children.entry(head.to_string()).or_insert(child)
            }
        };

        child.insert(
            scope_depth + 1,
            tail,
            parent_scopes,
            font_style,
            foreground,
            background,
        );
    }

    fn insert_here(
        &mut self,
        scope_depth: usize,
        parent_scopes: Option<&[String]>,
        mut font_style: Option<FontStyle>,
        mut foreground: u16,
        mut background: u16,
    ) {
        let Some(parent_scopes) = parent_scopes else {
            self.main_rule
                .accept_overwrite(scope_depth, font_style, foreground, background);
            return;
        };

        if let Some(rule) = self
            .rules_with_parent_scopes
            .iter_mut()
            .find(|r| r.parent_scopes.as_deref() == Some(parent_scopes))
        {
            rule.accept_overwrite(scope_depth, font_style, foreground, background);
            return;
        }

        if font_style.is_none() {
            font_style = self.main_rule.font_style;
        }
        if foreground == 0 {
            foreground = self.main_rule.foreground;
        }
        if background == 0 {
            background = self.main_rule.background;
        }

        self.rules_with_parent_scopes.push(ThemeTrieElementRule::new(
            scope_depth,
            Some(parent_scopes.to_vec()),
            font_style,
            foreground,
            background,
        ));
    }
}
