//! Match Engine (spec.md §4.4): compiles a declarative command → pattern
//! → handler tree into an evaluator that runs over every inbound
//! message for one handler unit.
//!
//! Design Notes (spec.md §9) call for replacing a macro DSL with a
//! builder API; `MatchTableBuilder` is that builder. The
//! compiled `MatchTable` it produces is the single source of truth;
//! the builder is purely cosmetic sugar over it.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use ircbot_wire::Message;
use tokio::task::JoinHandle;

use crate::context::Context;
use crate::pattern::{Pattern, PatternError, DEFAULT_CHARCLASS};

pub type HandlerFuture = Pin<Box<dyn Future<Output = ()> + Send>>;
pub type ValidatorFn = Arc<dyn Fn(&Message) -> bool + Send + Sync>;

/// A handler body: an async function from `Context` to `()`. Shared via
/// `Arc` so the same body can back multiple aliases or be reused by
/// both a sync and async match specification.
#[derive(Clone)]
pub struct Handler(Arc<dyn Fn(Context) -> HandlerFuture + Send + Sync>);

impl Handler {
    pub fn new<F, Fut>(f: F) -> Handler
    where
        F: Fn(Context) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Handler(Arc::new(move |ctx| Box::pin(f(ctx))))
    }

    fn call(&self, ctx: Context) -> HandlerFuture {
        (self.0)(ctx)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Uniqueness {
    PerChannel,
    PerChannelPerNick,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OverridePolicy {
    KillExisting,
    SkipNew,
}

struct MatchSpec {
    id: usize,
    pattern: Pattern,
    handler: Handler,
    validators: Vec<String>,
    is_async: bool,
    uniqueness: Option<(Uniqueness, OverridePolicy)>,
    help: Option<HelpEntry>,
}

#[derive(Clone)]
struct HelpEntry {
    canonical: String,
    aliases: Vec<String>,
    description: Option<String>,
}

/// The compiled, immutable-after-build match table for one handler unit,
/// plus the mutable per-specification uniqueness bookkeeping (spec.md
/// §3 Handler Unit's "auxiliary key-value store for per-unit uniqueness
/// tracking").
pub struct MatchTable {
    unit_name: Arc<str>,
    groups: HashMap<String, Vec<MatchSpec>>,
    validators: HashMap<String, ValidatorFn>,
    uniqueness_tasks: Arc<DashMap<(usize, String), JoinHandle<()>>>,
}

impl MatchTable {
    pub fn unit_name(&self) -> &str {
        &self.unit_name
    }

    /// Evaluate every match specification in the group for
    /// `ctx.message.command`, in declared order (spec.md §4.4 Evaluation
    /// order). Does not short-circuit: every spec whose validators and
    /// pattern pass fires, even after an earlier one already fired.
    pub async fn dispatch(&self, ctx: Context) {
        let Some(specs) = self.groups.get(&ctx.message.command) else {
            return;
        };

        for spec in specs {
            if !spec.validators.iter().all(|name| self.run_validator(name, &ctx.message)) {
                continue;
            }
            let Some(captures) = spec.pattern.matches(&ctx.message.trailing) else {
                continue;
            };

            let mut fired_ctx = ctx.clone();
            fired_ctx.captures = captures;

            self.fire(spec, fired_ctx).await;
        }
    }

    fn run_validator(&self, name: &str, msg: &Message) -> bool {
        match self.validators.get(name) {
            Some(validator) => validator(msg),
            None => {
                log::warn!(
                    "unit {:?}: unknown validator {name:?}, treating scope as failed",
                    self.unit_name
                );
                false
            }
        }
    }

    async fn fire(&self, spec: &MatchSpec, ctx: Context) {
        if let Some((uniqueness, override_policy)) = spec.uniqueness {
            let key = uniqueness_key(uniqueness, &ctx);
            let table_key = (spec.id, key.clone());

            if let Some((_, existing)) = self.uniqueness_tasks.remove(&table_key) {
                match override_policy {
                    OverridePolicy::KillExisting => existing.abort(),
                    OverridePolicy::SkipNew => {
                        // Put the still-running task back and skip firing.
                        self.uniqueness_tasks.insert(table_key, existing);
                        return;
                    }
                }
            }

            let handler = spec.handler.clone();
            let tasks = self.uniqueness_tasks.clone();
            let cleanup_key = table_key.clone();
            let task = tokio::spawn(async move {
                handler.call(ctx).await;
                tasks.remove(&cleanup_key);
            });
            self.uniqueness_tasks.insert(table_key, task);
            return;
        }

        if spec.is_async {
            let handler = spec.handler.clone();
            tokio::spawn(async move {
                handler.call(ctx).await;
            });
        } else {
            spec.handler.call(ctx).await;
        }
    }
}

fn uniqueness_key(kind: Uniqueness, ctx: &Context) -> String {
    let channel = crate::context::resolve_target(&ctx.message, "").unwrap_or_default();
    match kind {
        Uniqueness::PerChannel => format!("{}\u{0}{channel}", ctx.unit_name),
        Uniqueness::PerChannelPerNick => {
            format!("{}\u{0}{channel}\u{0}{}", ctx.unit_name, ctx.message.source_nick())
        }
    }
}

// ---- Builder -------------------------------------------------------

struct DraftSpec {
    patterns: Vec<(PatternSource, String)>, // (source, capture_charclass), first is canonical
    handler: Handler,
    validators: Vec<String>,
    is_async: bool,
    uniqueness: Option<(Uniqueness, OverridePolicy)>,
    description: Option<String>,
}

enum PatternSource {
    Auto(String),
    Regex(String),
    MatchAll,
}

static NEXT_SPEC_ID: AtomicUsize = AtomicUsize::new(0);

pub struct MatchTableBuilder {
    unit_name: String,
    groups: HashMap<String, Vec<DraftSpec>>,
    validators: HashMap<String, ValidatorFn>,
    help_cmd: Option<String>,
}

impl MatchTableBuilder {
    pub fn new(unit_name: impl Into<String>) -> Self {
        MatchTableBuilder {
            unit_name: unit_name.into(),
            groups: HashMap::new(),
            validators: HashMap::new(),
            help_cmd: None,
        }
    }

    pub fn validator<F>(&mut self, name: impl Into<String>, predicate: F) -> &mut Self
    where
        F: Fn(&Message) -> bool + Send + Sync + 'static,
    {
        self.validators.insert(name.into(), Arc::new(predicate));
        self
    }

    /// When set, the engine synthesizes the two help match
    /// specifications described in spec.md §4.4 "Help surface",
    /// attached to the `PRIVMSG` group (help is invoked the same way as
    /// any other chat command).
    pub fn help_cmd(&mut self, prefix: impl Into<String>) -> &mut Self {
        self.help_cmd = Some(prefix.into());
        self
    }

    pub fn command(
        &mut self,
        command: impl Into<String>,
        body: impl FnOnce(&mut CommandGroupBuilder),
    ) -> &mut Self {
        let command = command.into();
        let mut group = CommandGroupBuilder {
            specs: self.groups.remove(&command).unwrap_or_default(),
            validator_stack: Vec::new(),
        };
        body(&mut group);
        self.groups.insert(command, group.specs);
        self
    }

    pub fn build(self) -> Result<MatchTable, PatternError> {
        let unit_name: Arc<str> = Arc::from(self.unit_name.as_str());
        let mut compiled: HashMap<String, Vec<MatchSpec>> = HashMap::new();
        let mut help_entries: Vec<HelpEntry> = Vec::new();

        for (command, drafts) in self.groups {
            let mut specs = Vec::with_capacity(drafts.len());
            for draft in drafts {
                let mut alias_patterns = Vec::with_capacity(draft.patterns.len());
                for (source, charclass) in &draft.patterns {
                    alias_patterns.push(compile_pattern(source, charclass)?);
                }

                let canonical_render = alias_patterns[0].help_render();
                let alias_renders: Vec<String> =
                    alias_patterns[1..].iter().map(Pattern::help_render).collect();

                for (idx, pattern) in alias_patterns.into_iter().enumerate() {
                    let help = if idx == 0 {
                        Some(HelpEntry {
                            canonical: canonical_render.clone(),
                            aliases: alias_renders.clone(),
                            description: draft.description.clone(),
                        })
                    } else {
                        None
                    };
                    let spec = MatchSpec {
                        id: NEXT_SPEC_ID.fetch_add(1, Ordering::Relaxed),
                        pattern,
                        handler: draft.handler.clone(),
                        validators: draft.validators.clone(),
                        is_async: draft.is_async,
                        uniqueness: draft.uniqueness,
                        help,
                    };
                    if let Some(h) = &spec.help {
                        help_entries.push(h.clone());
                    }
                    specs.push(spec);
                }
            }
            compiled.insert(command, specs);
        }

        if let Some(prefix) = &self.help_cmd {
            add_help_specs(&mut compiled, prefix, &help_entries);
        }

        Ok(MatchTable {
            unit_name,
            groups: compiled,
            validators: self.validators,
            uniqueness_tasks: Arc::new(DashMap::new()),
        })
    }
}

fn compile_pattern(source: &PatternSource, charclass: &str) -> Result<Pattern, PatternError> {
    match source {
        PatternSource::MatchAll => Ok(Pattern::match_all()),
        PatternSource::Regex(src) => Pattern::regex(src, src.contains("(?P<")),
        PatternSource::Auto(src) => {
            if looks_like_template(src) {
                Pattern::template(src, charclass)
            } else {
                Ok(Pattern::literal(src.clone()))
            }
        }
    }
}

fn looks_like_template(source: &str) -> bool {
    source
        .split_whitespace()
        .any(|tok| tok.starts_with(':') || tok.starts_with('~'))
}

fn add_help_specs(groups: &mut HashMap<String, Vec<MatchSpec>>, prefix: &str, entries: &[HelpEntry]) {
    let entries = entries.to_vec();
    let bare_entries = entries.clone();
    let bare_handler = Handler::new(move |ctx: Context| {
        let entries = bare_entries.clone();
        async move {
            let mut lines = entries
                .iter()
                .map(|e| e.canonical.clone())
                .collect::<Vec<_>>();
            lines.sort();
            ctx.reply(&lines.join(", ")).await;
        }
    });

    let search_handler = Handler::new(move |ctx: Context| {
        let entries = entries.clone();
        async move {
            let term = ctx.captures.get("term").cloned().unwrap_or_default();
            // Exact match on the primary pattern's first token
            // (spec.md §9 Open Question 3: converge on this, not prefix
            // match on an ANSI doc string).
            match entries.iter().find(|e| {
                e.canonical.split_whitespace().next() == Some(term.as_str())
            }) {
                Some(entry) => {
                    let mut text = entry.canonical.clone();
                    if !entry.aliases.is_empty() {
                        text.push_str(&format!(" (aliases: {})", entry.aliases.join(", ")));
                    }
                    if let Some(desc) = &entry.description {
                        text.push_str(" — ");
                        text.push_str(desc);
                    }
                    ctx.reply(&text).await;
                }
                None => ctx.reply(&format!("no such command: {term}")).await,
            }
        }
    });

    let bare_pattern = Pattern::literal(prefix.to_owned());
    let search_pattern = Pattern::template(&format!("{prefix} :term"), DEFAULT_CHARCLASS)
        .expect("help search pattern is always a valid template");

    let privmsg_specs = groups.entry("PRIVMSG".to_owned()).or_default();
    privmsg_specs.push(MatchSpec {
        id: NEXT_SPEC_ID.fetch_add(1, Ordering::Relaxed),
        pattern: bare_pattern,
        handler: bare_handler,
        validators: Vec::new(),
        is_async: false,
        uniqueness: None,
        help: None,
    });
    privmsg_specs.push(MatchSpec {
        id: NEXT_SPEC_ID.fetch_add(1, Ordering::Relaxed),
        pattern: search_pattern,
        handler: search_handler,
        validators: Vec::new(),
        is_async: false,
        uniqueness: None,
        help: None,
    });
}

pub struct CommandGroupBuilder {
    specs: Vec<DraftSpec>,
    validator_stack: Vec<Vec<String>>,
}

impl CommandGroupBuilder {
    fn active_validators(&self) -> Vec<String> {
        self.validator_stack.iter().flatten().cloned().collect()
    }

    /// Require every predicate in `names` for everything registered
    /// inside `body` (spec.md §4.4 nested validator scopes).
    pub fn scope<'a>(
        &mut self,
        names: impl IntoIterator<Item = &'a str>,
        body: impl FnOnce(&mut Self),
    ) -> &mut Self {
        self.validator_stack.push(names.into_iter().map(str::to_owned).collect());
        body(self);
        self.validator_stack.pop();
        self
    }

    fn push(&mut self, draft: DraftSpec) -> &mut Self {
        self.specs.push(draft);
        self
    }

    /// Synchronous match over one or more patterns; the first is
    /// canonical for help purposes, the rest are aliases (spec.md §4.4
    /// Aliases).
    pub fn on<'a>(
        &mut self,
        patterns: impl IntoIterator<Item = &'a str>,
        handler: Handler,
    ) -> &mut Self {
        self.on_charclass(patterns, DEFAULT_CHARCLASS, handler)
    }

    pub fn on_charclass<'a>(
        &mut self,
        patterns: impl IntoIterator<Item = &'a str>,
        charclass: &str,
        handler: Handler,
    ) -> &mut Self {
        let patterns: Vec<(PatternSource, String)> = patterns
            .into_iter()
            .map(|p| (PatternSource::Auto(p.to_owned()), charclass.to_owned()))
            .collect();
        self.push(DraftSpec {
            patterns,
            handler,
            validators: self.active_validators(),
            is_async: false,
            uniqueness: None,
            description: None,
        })
    }

    /// Asynchronous match: the handler body is launched on its own task
    /// and evaluation continues immediately (spec.md §4.4 item 5).
    pub fn on_async(&mut self, pattern: &str, handler: Handler) -> &mut Self {
        self.push(DraftSpec {
            patterns: vec![(PatternSource::Auto(pattern.to_owned()), DEFAULT_CHARCLASS.to_owned())],
            handler,
            validators: self.active_validators(),
            is_async: true,
            uniqueness: None,
            description: None,
        })
    }

    /// Same as `on_async`, additionally restricting concurrent
    /// executions per `uniqueness`/`override_policy` (spec.md §4.4
    /// Uniqueness).
    pub fn on_async_unique(
        &mut self,
        pattern: &str,
        handler: Handler,
        uniqueness: Uniqueness,
        override_policy: OverridePolicy,
    ) -> &mut Self {
        self.push(DraftSpec {
            patterns: vec![(PatternSource::Auto(pattern.to_owned()), DEFAULT_CHARCLASS.to_owned())],
            handler,
            validators: self.active_validators(),
            is_async: true,
            uniqueness: Some((uniqueness, override_policy)),
            description: None,
        })
    }

    pub fn on_regex(&mut self, source: &str, handler: Handler) -> &mut Self {
        self.push(DraftSpec {
            patterns: vec![(PatternSource::Regex(source.to_owned()), DEFAULT_CHARCLASS.to_owned())],
            handler,
            validators: self.active_validators(),
            is_async: false,
            uniqueness: None,
            description: None,
        })
    }

    pub fn on_all(&mut self, handler: Handler) -> &mut Self {
        self.push(DraftSpec {
            patterns: vec![(PatternSource::MatchAll, DEFAULT_CHARCLASS.to_owned())],
            handler,
            validators: self.active_validators(),
            is_async: false,
            uniqueness: None,
            description: None,
        })
    }

    /// Attach help documentation to the most recently registered spec.
    pub fn describe(&mut self, text: impl Into<String>) -> &mut Self {
        if let Some(last) = self.specs.last_mut() {
            last.description = Some(text.into());
        }
        self
    }
}
