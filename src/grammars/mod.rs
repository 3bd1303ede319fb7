mod anchors;
mod compiled;
mod injections;
mod pattern_set;
mod raw;
pub(crate) mod regex;

pub(crate) use anchors::AnchorActive;
pub use compiled::RuleId;
pub(crate) use compiled::{CompiledRules, Rule, RuleFactory, RuleRegistry};
pub(crate) use injections::{Injection, scope_matches};
pub use injections::{InjectionPrecedence, InjectionSelector, SelectorMatcher, parse_injection_selector};
pub(crate) use pattern_set::PatternSetMatch;
pub use raw::{RawCaptures, RawGrammar, RawRule};
