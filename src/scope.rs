//! The scopes active at some point of a line, along with their merged style.

use std::fmt;
use std::sync::Arc;

use crate::grammars::scope_matches;
use crate::metadata::TokenMetadata;
use crate::scope_metadata::{ScopeMetadata, ScopeMetadataProvider};

struct ScopeListNode {
    parent: Option<ScopeList>,
    scope: String,
    metadata: TokenMetadata,
}

/// An immutable list of scope names, from the root scope to the innermost one.
///
/// Pushing allocates a new tip sharing everything before it, so states of different lines
/// share their common prefix. Each node stores the metadata of the token styled by all the
/// scopes up to it.
#[derive(Clone)]
pub struct ScopeList(Arc<ScopeListNode>);

impl ScopeList {
    pub(crate) fn new(parent: Option<ScopeList>, scope: &str, metadata: TokenMetadata) -> Self {
        Self(Arc::new(ScopeListNode {
            parent,
            scope: scope.to_string(),
            metadata,
        }))
    }

    /// A root list for `scope`, merged on top of the default metadata
    pub(crate) fn root(scope: &str, provider: &ScopeMetadataProvider) -> Self {
        let metadata = Self::merge_metadata(
            provider.default_metadata(),
            None,
            &provider.lookup(Some(scope)),
        );
        Self::new(None, scope, metadata)
    }

    pub fn scope(&self) -> &str {
        &self.0.scope
    }

    pub fn metadata(&self) -> TokenMetadata {
        self.0.metadata
    }

    pub fn parent(&self) -> Option<&ScopeList> {
        self.0.parent.as_ref()
    }

    /// Every scope name, root first
    pub fn generate_scopes(&self) -> Vec<&str> {
        let mut out = Vec::new();
        let mut node = Some(self);
        while let Some(list) = node {
            out.push(list.scope());
            node = list.parent();
        }
        out.reverse();
        out
    }

    /// Whether the ancestor selectors of a theme rule (nearest first) are found, in order,
    /// walking from `target` towards the root
    fn matches_parent_scopes(target: Option<&ScopeList>, parent_scopes: Option<&[String]>) -> bool {
        let Some(parent_scopes) = parent_scopes else {
            return true;
        };
        let mut selectors = parent_scopes.iter().peekable();
        let mut node = target;
        while let Some(list) = node {
            let Some(selector) = selectors.peek() else {
                break;
            };
            if scope_matches(list.scope(), selector) {
                selectors.next();
            }
            node = list.parent();
        }
        selectors.peek().is_none()
    }

    /// Applies the first theme rule of `source` matching the ancestors in `scopes`
    pub(crate) fn merge_metadata(
        metadata: TokenMetadata,
        scopes: Option<&ScopeList>,
        source: &ScopeMetadata,
    ) -> TokenMetadata {
        let Some(theme_data) = &source.theme_data else {
            return metadata;
        };

        let rule = theme_data
            .iter()
            .find(|rule| Self::matches_parent_scopes(scopes, rule.parent_scopes.as_deref()));
        let (font_style, foreground, background) = match rule {
            Some(rule) => (rule.font_style, rule.foreground, rule.background),
            None => (None, 0, 0),
        };

        metadata.set(
            source.language_id,
            source.token_type,
            font_style,
            foreground,
            background,
        )
    }

    fn push_single(&self, provider: &ScopeMetadataProvider, scope: &str) -> Self {
        let metadata =
            Self::merge_metadata(self.metadata(), Some(self), &provider.lookup(Some(scope)));
        Self::new(Some(self.clone()), scope, metadata)
    }

    /// Pushes each of the space separated scopes of `scope`. Nothing is pushed for `None`.
    pub(crate) fn push(&self, provider: &ScopeMetadataProvider, scope: Option<&str>) -> Self {
        let Some(scope) = scope else {
            return self.clone();
        };
        if !scope.contains(' ') {
            return self.push_single(provider, scope);
        }
        let mut out = self.clone();
        for part in scope.split(' ').filter(|s| !s.is_empty()) {
            out = out.push_single(provider, part);
        }
        out
    }
}

impl PartialEq for ScopeList {
    fn eq(&self, other: &Self) -> bool {
        let mut a = Some(self);
        let mut b = Some(other);
        loop {
            match (a, b) {
                (None, None) => return true,
                (Some(x), Some(y)) => {
                    if Arc::ptr_eq(&x.0, &y.0) {
                        return true;
                    }
                    if x.scope() != y.scope() || x.metadata() != y.metadata() {
                        return false;
                    }
                    a = x.parent();
                    b = y.parent();
                }
                _ => return false,
            }
        }
    }
}

impl Eq for ScopeList {}

impl fmt::Debug for ScopeList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.generate_scopes().join(" "))
    }
}
