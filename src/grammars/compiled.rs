use std::borrow::Cow;
use std::collections::{HashMap, HashSet};
use std::ops::Deref;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::error::{Error, TintaResult};
use crate::grammar::GrammarRepository;
use crate::grammars::anchors::AnchorActive;
use crate::grammars::injections::{Injection, parse_injection_selector};
use crate::grammars::pattern_set::{PatternSet, RegexSourceList};
use crate::grammars::raw::{RawCaptures, RawGrammar, RawRule, external_include};
use crate::grammars::regex::{RegexSource, has_captures, replace_captures};

/// Index of a rule in a compiled grammar.
/// Rules of the grammars included by a grammar live in the same id space.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct RuleId(pub u32);

impl RuleId {
    /// Stands for the end pattern of the current begin/end rule in a pattern set
    pub const END: RuleId = RuleId(u32::MAX);
    /// Stands for the while pattern of a begin/while rule in a pattern set
    pub const WHILE: RuleId = RuleId(u32::MAX - 1);
}

impl Deref for RuleId {
    type Target = u32;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// A `name` or `contentName`, which can refer to captured groups
#[derive(Debug, Clone)]
pub(crate) struct RuleName {
    template: String,
    has_captures: bool,
}

impl RuleName {
    fn new(template: &str) -> Self {
        Self {
            template: template.to_string(),
            has_captures: has_captures(template),
        }
    }

    pub fn resolve(&self, line: &str, captures: &[Option<(usize, usize)>]) -> Cow<'_, str> {
        if self.has_captures {
            Cow::Owned(replace_captures(&self.template, line, captures))
        } else {
            Cow::Borrowed(&self.template)
        }
    }
}

fn resolve_name<'a>(
    name: &'a Option<RuleName>,
    line: &str,
    captures: &[Option<(usize, usize)>],
) -> Option<Cow<'a, str>> {
    name.as_ref().map(|n| n.resolve(line, captures))
}

/// Compiled pattern lists are only built when a rule is first used and shared afterwards
type PatternCache = Mutex<Option<RegexSourceList>>;

fn lock(cache: &PatternCache) -> MutexGuard<'_, Option<RegexSourceList>> {
    // the list is never left half-updated so a poisoned lock is still usable
    cache.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug)]
pub(crate) struct CaptureRule {
    pub id: RuleId,
    pub name: Option<RuleName>,
    pub content_name: Option<RuleName>,
    /// The captured text is tokenized again with that rule when set
    pub retokenize: Option<RuleId>,
}

#[derive(Debug)]
pub(crate) struct MatchRule {
    pub id: RuleId,
    pub name: Option<RuleName>,
    pub regex: RegexSource,
    pub captures: Vec<Option<RuleId>>,
    cache: PatternCache,
}

#[derive(Debug)]
pub(crate) struct IncludeOnlyRule {
    pub id: RuleId,
    pub name: Option<RuleName>,
    pub content_name: Option<RuleName>,
    pub patterns: Vec<RuleId>,
    pub has_missing_patterns: bool,
    cache: PatternCache,
}

#[derive(Debug)]
pub(crate) struct BeginEndRule {
    pub id: RuleId,
    pub name: Option<RuleName>,
    pub content_name: Option<RuleName>,
    pub begin: RegexSource,
    pub begin_captures: Vec<Option<RuleId>>,
    pub end: RegexSource,
    pub end_captures: Vec<Option<RuleId>>,
    pub apply_end_pattern_last: bool,
    pub patterns: Vec<RuleId>,
    pub has_missing_patterns: bool,
    cache: PatternCache,
}

#[derive(Debug)]
pub(crate) struct BeginWhileRule {
    pub id: RuleId,
    pub name: Option<RuleName>,
    pub content_name: Option<RuleName>,
    pub begin: RegexSource,
    pub begin_captures: Vec<Option<RuleId>>,
    pub while_: RegexSource,
    pub while_captures: Vec<Option<RuleId>>,
    pub patterns: Vec<RuleId>,
    pub has_missing_patterns: bool,
    cache: PatternCache,
    while_cache: PatternCache,
}

#[derive(Debug)]
pub(crate) enum Rule {
    Match(MatchRule),
    IncludeOnly(IncludeOnlyRule),
    BeginEnd(BeginEndRule),
    BeginWhile(BeginWhileRule),
    Capture(CaptureRule),
}

impl Rule {
    pub fn id(&self) -> RuleId {
        match self {
            Rule::Match(r) => r.id,
            Rule::IncludeOnly(r) => r.id,
            Rule::BeginEnd(r) => r.id,
            Rule::BeginWhile(r) => r.id,
            Rule::Capture(r) => r.id,
        }
    }

    pub fn name<'a>(&'a self, line: &str, captures: &[Option<(usize, usize)>]) -> Option<Cow<'a, str>> {
        let name = match self {
            Rule::Match(r) => &r.name,
            Rule::IncludeOnly(r) => &r.name,
            Rule::BeginEnd(r) => &r.name,
            Rule::BeginWhile(r) => &r.name,
            Rule::Capture(r) => &r.name,
        };
        resolve_name(name, line, captures)
    }

    pub fn content_name<'a>(
        &'a self,
        line: &str,
        captures: &[Option<(usize, usize)>],
    ) -> Option<Cow<'a, str>> {
        let name = match self {
            Rule::Match(_) => return None,
            Rule::IncludeOnly(r) => &r.content_name,
            Rule::BeginEnd(r) => &r.content_name,
            Rule::BeginWhile(r) => &r.content_name,
            Rule::Capture(r) => &r.content_name,
        };
        resolve_name(name, line, captures)
    }

    /// An include-only, begin/end or begin/while rule whose patterns all failed to resolve
    fn is_empty_after_missing_patterns(&self) -> bool {
        match self {
            Rule::IncludeOnly(r) => r.has_missing_patterns && r.patterns.is_empty(),
            Rule::BeginEnd(r) => r.has_missing_patterns && r.patterns.is_empty(),
            Rule::BeginWhile(r) => r.has_missing_patterns && r.patterns.is_empty(),
            Rule::Match(_) | Rule::Capture(_) => false,
        }
    }
}

/// Every rule of a compiled grammar, addressed by [`RuleId`].
#[derive(Debug, Default)]
pub(crate) struct RuleRegistry {
    rules: Vec<Option<Rule>>,
}

impl RuleRegistry {
    pub fn get(&self, id: RuleId) -> Option<&Rule> {
        self.rules.get(*id as usize).and_then(|r| r.as_ref())
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Rule> {
        self.rules.iter().flatten()
    }

    fn reserve(&mut self) -> RuleId {
        self.rules.push(None);
        RuleId((self.rules.len() - 1) as u32)
    }

    fn set(&mut self, id: RuleId, rule: Rule) {
        self.rules[*id as usize] = Some(rule);
    }

    /// What a rule contributes to the pattern list of the rule containing it: its `match` or
    /// `begin` pattern, or, for an include-only rule, the patterns of everything it includes.
    fn collect_patterns_into(
        &self,
        id: RuleId,
        list: &mut RegexSourceList,
        visited: &mut HashSet<RuleId>,
    ) {
        match self.get(id) {
            Some(Rule::Match(r)) => list.push(r.regex.clone()),
            Some(Rule::BeginEnd(r)) => list.push(r.begin.clone()),
            Some(Rule::BeginWhile(r)) => list.push(r.begin.clone()),
            Some(Rule::IncludeOnly(r)) => {
                // `$self` and mutually recursive repository entries
                if visited.insert(id) {
                    for pattern in &r.patterns {
                        self.collect_patterns_into(*pattern, list, visited);
                    }
                }
            }
            Some(Rule::Capture(_)) | None => (),
        }
    }

    fn collect_children(&self, id: RuleId, patterns: &[RuleId]) -> RegexSourceList {
        let mut list = RegexSourceList::new();
        let mut visited = HashSet::from([id]);
        for pattern in patterns {
            self.collect_patterns_into(*pattern, &mut list, &mut visited);
        }
        list
    }

    /// The pattern set to search while `id` is the rule on top of the stack.
    ///
    /// `end_regex` is the end pattern of a begin/end rule with its back-references resolved.
    pub fn compile(
        &self,
        id: RuleId,
        end_regex: Option<&str>,
        anchors: AnchorActive,
    ) -> TintaResult<Arc<PatternSet>> {
        match self.get(id) {
            Some(Rule::IncludeOnly(r)) => lock(&r.cache)
                .get_or_insert_with(|| self.collect_children(id, &r.patterns))
                .compile(anchors),
            Some(Rule::BeginEnd(r)) => {
                let mut cache = lock(&r.cache);
                let list = cache.get_or_insert_with(|| {
                    let mut list = self.collect_children(id, &r.patterns);
                    if r.apply_end_pattern_last {
                        list.push(r.end.clone());
                    } else {
                        list.unshift(r.end.clone());
                    }
                    list
                });
                if r.end.has_back_references() {
                    let index = if r.apply_end_pattern_last { list.len() - 1 } else { 0 };
                    list.set_source(index, end_regex.unwrap_or(r.end.source()));
                }
                list.compile(anchors)
            }
            Some(Rule::BeginWhile(r)) => lock(&r.cache)
                .get_or_insert_with(|| self.collect_children(id, &r.patterns))
                .compile(anchors),
            Some(Rule::Match(r)) => lock(&r.cache)
                .get_or_insert_with(|| {
                    let mut list = RegexSourceList::new();
                    list.push(r.regex.clone());
                    list
                })
                .compile(anchors),
            Some(Rule::Capture(_)) | None => Ok(Arc::new(PatternSet::new(Vec::new())?)),
        }
    }

    /// The while pattern of a begin/while rule, alone in its set.
    pub fn compile_while(
        &self,
        id: RuleId,
        while_regex: Option<&str>,
        anchors: AnchorActive,
    ) -> TintaResult<Arc<PatternSet>> {
        let Some(Rule::BeginWhile(r)) = self.get(id) else {
            return Ok(Arc::new(PatternSet::new(Vec::new())?));
        };
        let mut cache = lock(&r.while_cache);
        let list = cache.get_or_insert_with(|| {
            let mut list = RegexSourceList::new();
            list.push(r.while_.clone());
            list
        });
        if r.while_.has_back_references() {
            list.set_source(0, while_regex.unwrap_or(r.while_.source()));
        }
        list.compile(anchors)
    }

    /// Builds every pattern set that doesn't depend on back-references, in all anchor contexts.
    pub fn precompile(&self) -> TintaResult<()> {
        for rule in self.iter() {
            let id = rule.id();
            for anchors in AnchorActive::ALL {
                match rule {
                    Rule::IncludeOnly(_) => {
                        self.compile(id, None, anchors)?;
                    }
                    Rule::BeginEnd(r) => {
                        if !r.end.has_back_references() {
                            self.compile(id, None, anchors)?;
                        }
                    }
                    Rule::BeginWhile(r) => {
                        self.compile(id, None, anchors)?;
                        if !r.while_.has_back_references() {
                            self.compile_while(id, None, anchors)?;
                        }
                    }
                    // never on top of the stack
                    Rule::Match(_) | Rule::Capture(_) => (),
                }
            }
        }
        Ok(())
    }
}

/// Where `#name` includes are looked up: the repository of the rule being compiled, then the
/// ones of the rules containing it, up to the grammar repository.
struct LocalRepository<'a> {
    entries: &'a HashMap<String, RawRule>,
    parent: Option<&'a LocalRepository<'a>>,
}

impl<'a> LocalRepository<'a> {
    fn get(&self, name: &str) -> Option<&'a RawRule> {
        self.entries
            .get(name)
            .or_else(|| self.parent.and_then(|p| p.get(name)))
    }
}

#[derive(Clone, Copy)]
struct Context<'a> {
    /// The grammar `$self` refers to
    scope_name: &'a str,
    repository: Option<&'a LocalRepository<'a>>,
}

#[derive(Debug, PartialEq, Eq, Hash)]
enum RuleKey {
    /// Raw rules are compiled once, wherever they are included from
    Raw(*const RawRule),
    Root(String),
}

/// The output of [`RuleFactory::compile`]
#[derive(Debug)]
pub(crate) struct CompiledRules {
    pub rules: RuleRegistry,
    pub root_id: RuleId,
    pub injections: Vec<Injection>,
}

/// Turns raw grammars into a [`RuleRegistry`], pulling included grammars from a repository.
pub(crate) struct RuleFactory<'r> {
    repository: &'r dyn GrammarRepository,
    base_scope: String,
    grammars: HashMap<String, Arc<RawGrammar>>,
    rules: RuleRegistry,
    ids: HashMap<RuleKey, RuleId>,
}

impl<'r> RuleFactory<'r> {
    pub fn compile(
        grammar: Arc<RawGrammar>,
        repository: &'r dyn GrammarRepository,
    ) -> TintaResult<CompiledRules> {
        let base_scope = grammar.scope_name.clone();
        let mut factory = Self {
            repository,
            base_scope: base_scope.clone(),
            grammars: HashMap::from([(base_scope.clone(), grammar.clone())]),
            rules: RuleRegistry::default(),
            ids: HashMap::new(),
        };

        let root_id = factory
            .root_rule_id(&base_scope)?
            .ok_or_else(|| Error::GrammarNotFound(base_scope.clone()))?;
        let injections = factory.collect_injections(&grammar)?;

        Ok(CompiledRules {
            rules: factory.rules,
            root_id,
            injections,
        })
    }

    fn grammar(&mut self, scope_name: &str) -> Option<Arc<RawGrammar>> {
        if let Some(grammar) = self.grammars.get(scope_name) {
            return Some(grammar.clone());
        }
        let grammar = self.repository.lookup(scope_name)?;
        self.grammars.insert(scope_name.to_string(), grammar.clone());
        Some(grammar)
    }

    /// Injections declared by the grammar itself come first, then the ones of the grammars
    /// registered as injecting into it. Left injections are tried before right ones.
    fn collect_injections(&mut self, grammar: &RawGrammar) -> TintaResult<Vec<Injection>> {
        let mut out = Vec::new();
        let repository = grammar.repository.as_ref().map(|entries| LocalRepository {
            entries,
            parent: None,
        });
        let ctx = Context {
            scope_name: &grammar.scope_name,
            repository: repository.as_ref(),
        };

        for (selector, raw) in &grammar.injections {
            let rule_id = self.rule_id(raw, ctx)?;
            for parsed in parse_injection_selector(selector) {
                out.push(Injection::new(parsed, rule_id));
            }
        }

        for injector in self.repository.injections(&grammar.scope_name) {
            let Some(injector_grammar) = self.grammar(&injector) else {
                log::warn!("Injection grammar {injector} not found for {}", grammar.scope_name);
                continue;
            };
            let Some(selector) = injector_grammar.injection_selector.as_deref() else {
                continue;
            };
            let Some(rule_id) = self.root_rule_id(&injector)? else {
                continue;
            };
            for parsed in parse_injection_selector(selector) {
                out.push(Injection::new(parsed, rule_id));
            }
        }

        // stable so the declaration order is kept within a priority
        out.sort_by_key(|i| i.priority());
        Ok(out)
    }

    fn root_rule_id(&mut self, scope_name: &str) -> TintaResult<Option<RuleId>> {
        let key = RuleKey::Root(scope_name.to_string());
        if let Some(id) = self.ids.get(&key) {
            return Ok(Some(*id));
        }
        let Some(grammar) = self.grammar(scope_name) else {
            return Ok(None);
        };
        let id = self.rules.reserve();
        self.ids.insert(key, id);

        let repository = grammar.repository.as_ref().map(|entries| LocalRepository {
            entries,
            parent: None,
        });
        let ctx = Context {
            scope_name: &grammar.scope_name,
            repository: repository.as_ref(),
        };
        let (patterns, has_missing_patterns) = self.compile_patterns(&grammar.patterns, ctx)?;
        self.rules.set(
            id,
            Rule::IncludeOnly(IncludeOnlyRule {
                id,
                name: None,
                content_name: None,
                patterns,
                has_missing_patterns,
                cache: Mutex::default(),
            }),
        );
        Ok(Some(id))
    }

    fn rule_id(&mut self, raw: &RawRule, ctx: Context<'_>) -> TintaResult<RuleId> {
        let key = RuleKey::Raw(raw as *const RawRule);
        if let Some(id) = self.ids.get(&key) {
            return Ok(*id);
        }
        // the id is known before the children are compiled so recursive rules can refer to it
        let id = self.rules.reserve();
        self.ids.insert(key, id);
        let rule = self.build_rule(id, raw, ctx)?;
        self.rules.set(id, rule);
        Ok(id)
    }

    fn build_rule(&mut self, id: RuleId, raw: &RawRule, ctx: Context<'_>) -> TintaResult<Rule> {
        let name = raw.name.as_deref().map(RuleName::new);
        let content_name = raw.content_name.as_deref().map(RuleName::new);

        if let Some(pattern) = &raw.match_ {
            return Ok(Rule::Match(MatchRule {
                id,
                name,
                regex: regex_source(pattern, id)?,
                captures: self.compile_captures(raw.captures.as_ref(), ctx)?,
                cache: Mutex::default(),
            }));
        }

        let Some(begin) = &raw.begin else {
            let local = raw.repository.as_ref().map(|entries| LocalRepository {
                entries,
                parent: ctx.repository,
            });
            let ctx = Context {
                scope_name: ctx.scope_name,
                repository: local.as_ref().or(ctx.repository),
            };
            let patterns = match (&raw.patterns, &raw.include) {
                (Some(patterns), _) => patterns.as_slice(),
                // `{"include": "#x"}` behaves like `{"patterns": [{"include": "#x"}]}`
                (None, Some(_)) => std::slice::from_ref(raw),
                (None, None) => &[],
            };
            let (patterns, has_missing_patterns) = self.compile_patterns(patterns, ctx)?;
            return Ok(Rule::IncludeOnly(IncludeOnlyRule {
                id,
                name,
                content_name,
                patterns,
                has_missing_patterns,
                cache: Mutex::default(),
            }));
        };

        let begin = regex_source(begin, id)?;
        let begin_captures = raw.begin_captures.as_ref().or(raw.captures.as_ref());

        if let Some(while_) = &raw.while_ {
            let (patterns, has_missing_patterns) =
                self.compile_patterns(raw.patterns.as_deref().unwrap_or_default(), ctx)?;
            return Ok(Rule::BeginWhile(BeginWhileRule {
                id,
                name,
                content_name,
                begin,
                begin_captures: self.compile_captures(begin_captures, ctx)?,
                while_: end_regex_source(while_, RuleId::WHILE)?,
                while_captures: self.compile_captures(
                    raw.while_captures.as_ref().or(raw.captures.as_ref()),
                    ctx,
                )?,
                patterns,
                has_missing_patterns,
                cache: Mutex::default(),
                while_cache: Mutex::default(),
            }));
        }

        let Some(end) = &raw.end else {
            // nothing would ever close it
            return Ok(Rule::Match(MatchRule {
                id,
                name,
                regex: begin,
                captures: self.compile_captures(begin_captures, ctx)?,
                cache: Mutex::default(),
            }));
        };

        let (patterns, has_missing_patterns) =
            self.compile_patterns(raw.patterns.as_deref().unwrap_or_default(), ctx)?;
        Ok(Rule::BeginEnd(BeginEndRule {
            id,
            name,
            content_name,
            begin,
            begin_captures: self.compile_captures(begin_captures, ctx)?,
            end: end_regex_source(end, RuleId::END)?,
            end_captures: self
                .compile_captures(raw.end_captures.as_ref().or(raw.captures.as_ref()), ctx)?,
            apply_end_pattern_last: raw.apply_end_pattern_last,
            patterns,
            has_missing_patterns,
            cache: Mutex::default(),
        }))
    }

    /// Returns the ids of the resolved patterns and whether some of them went missing.
    fn compile_patterns(
        &mut self,
        patterns: &[RawRule],
        ctx: Context<'_>,
    ) -> TintaResult<(Vec<RuleId>, bool)> {
        let mut out = Vec::with_capacity(patterns.len());

        for pattern in patterns {
            let id = match pattern.include.as_deref() {
                Some(include) => self.resolve_include(include, ctx)?,
                None => Some(self.rule_id(pattern, ctx)?),
            };
            let Some(id) = id else {
                continue;
            };
            // still being built when it's a recursive reference
            if self
                .rules
                .get(id)
                .is_some_and(|r| r.is_empty_after_missing_patterns())
            {
                continue;
            }
            out.push(id);
        }

        let has_missing_patterns = out.len() != patterns.len();
        Ok((out, has_missing_patterns))
    }

    fn resolve_include(&mut self, include: &str, ctx: Context<'_>) -> TintaResult<Option<RuleId>> {
        if include == "$self" {
            return self.root_rule_id(ctx.scope_name);
        }
        if include == "$base" {
            let base = self.base_scope.clone();
            return self.root_rule_id(&base);
        }
        if let Some(name) = include.strip_prefix('#') {
            return match ctx.repository.and_then(|r| r.get(name)) {
                Some(raw) => self.rule_id(raw, ctx).map(Some),
                None => {
                    log::warn!("Rule {include} not found in the repository of {}", ctx.scope_name);
                    Ok(None)
                }
            };
        }
        let Some((scope_name, rule_name)) = external_include(include) else {
            return Ok(None);
        };
        let Some(grammar) = self.grammar(scope_name) else {
            log::warn!("Grammar {scope_name} not found, included from {}", ctx.scope_name);
            return Ok(None);
        };
        let Some(rule_name) = rule_name else {
            return self.root_rule_id(scope_name);
        };

        let Some(raw) = grammar.repository.as_ref().and_then(|r| r.get(rule_name)) else {
            log::warn!("Rule {rule_name} not found in the repository of {scope_name}");
            return Ok(None);
        };
        let repository = grammar.repository.as_ref().map(|entries| LocalRepository {
            entries,
            parent: None,
        });
        let external_ctx = Context {
            scope_name: &grammar.scope_name,
            repository: repository.as_ref(),
        };
        self.rule_id(raw, external_ctx).map(Some)
    }

    fn compile_captures(
        &mut self,
        captures: Option<&RawCaptures>,
        ctx: Context<'_>,
    ) -> TintaResult<Vec<Option<RuleId>>> {
        let Some(captures) = captures else {
            return Ok(Vec::new());
        };
        let mut entries: Vec<(usize, &RawRule)> = captures
            .iter()
            .filter_map(|(k, v)| Some((k.parse::<usize>().ok()?, v)))
            .collect();
        entries.sort_by_key(|(index, _)| *index);
        let Some((max, _)) = entries.last() else {
            return Ok(Vec::new());
        };

        let mut out = vec![None; max + 1];
        for (index, raw) in entries {
            let retokenize = if raw.patterns.is_some() {
                Some(self.rule_id(raw, ctx)?)
            } else {
                None
            };
            let id = self.rules.reserve();
            self.rules.set(
                id,
                Rule::Capture(CaptureRule {
                    id,
                    name: raw.name.as_deref().map(RuleName::new),
                    content_name: raw.content_name.as_deref().map(RuleName::new),
                    retokenize,
                }),
            );
            out[index] = Some(id);
        }
        Ok(out)
    }
}

/// Every pattern is compiled once up front so a broken grammar fails to load
/// instead of failing on some line later on.
fn regex_source(pattern: &str, rule_id: RuleId) -> TintaResult<RegexSource> {
    let source = RegexSource::new(pattern, rule_id);
    validate(pattern, source.source())?;
    Ok(source)
}

/// `end` and `while` patterns can refer to groups of the begin match. Those are checked with
/// every `\N` resolved to an empty string, which is what a group that did not participate gives.
fn end_regex_source(pattern: &str, rule_id: RuleId) -> TintaResult<RegexSource> {
    let source = RegexSource::new(pattern, rule_id);
    if source.has_back_references() {
        validate(pattern, &source.resolve_back_references("", &[]))?;
    } else {
        validate(pattern, source.source())?;
    }
    Ok(source)
}

fn validate(pattern: &str, source: &str) -> TintaResult<()> {
    onig::Regex::new(source).map(|_| ()).map_err(|e| Error::InvalidRegex {
        pattern: pattern.to_string(),
        message: e.to_string(),
    })
}
