//! Pattern grammar (spec.md §4.4) shared between the Match Engine and
//! the Callback Broker's `await_resp` predicate construction (spec.md
//! §4.5 reuses "compile the pattern as in §4.4").

use std::collections::HashMap;

use regex::Regex;

pub const DEFAULT_CHARCLASS: &str = "[A-Za-z0-9]+";

#[derive(Debug, thiserror::Error)]
#[error("invalid pattern {pattern:?}: {source}")]
pub struct PatternError {
    pattern: String,
    #[source]
    source: regex::Error,
}

/// One compiled pattern. `Literal` and `MatchAll` need no regex engine
/// at all; `Template` and `Regex` are backed by a compiled, anchored
/// `regex::Regex`.
#[derive(Clone)]
pub enum Pattern {
    Literal(String),
    Template { source: String, regex: Regex },
    Regex { source: String, regex: Regex, named_captures: bool },
    MatchAll,
}

impl Pattern {
    pub fn literal(s: impl Into<String>) -> Pattern {
        Pattern::Literal(s.into())
    }

    pub fn match_all() -> Pattern {
        Pattern::MatchAll
    }

    /// Compile a parameterized template (spec.md §4.4 item 2):
    /// space-separated tokens, each a literal word, `:name`, `:name(regex)`,
    /// or `~name`, joined by single spaces and anchored with `^...$`.
    pub fn template(template: &str, capture_charclass: &str) -> Result<Pattern, PatternError> {
        let regex = compile_template_regex(template, capture_charclass)
            .map_err(|source| PatternError { pattern: template.to_owned(), source })?;
        Ok(Pattern::Template {
            source: template.to_owned(),
            regex,
        })
    }

    /// A regular expression matched against `trailing`. `named_captures`
    /// controls whether a match without any `(?P<name>...)` groups is
    /// still reported as matching with an empty capture set (boolean
    /// test) or rejected outright when no named group exists to bind
    /// (irrelevant either way, since both variants succeed on any match;
    /// the flag only documents intent at the declaration site).
    pub fn regex(source: &str, named_captures: bool) -> Result<Pattern, PatternError> {
        let regex = Regex::new(source).map_err(|source_err| PatternError {
            pattern: source.to_owned(),
            source: source_err,
        })?;
        Ok(Pattern::Regex {
            source: source.to_owned(),
            regex,
            named_captures,
        })
    }

    /// Try to match `trailing`. `Some(captures)` on match (empty map if
    /// the pattern has no named groups), `None` otherwise.
    pub fn matches(&self, trailing: &str) -> Option<HashMap<String, String>> {
        match self {
            Pattern::Literal(lit) => (lit == trailing).then(HashMap::new),
            Pattern::MatchAll => Some(HashMap::new()),
            Pattern::Template { regex, .. } | Pattern::Regex { regex, .. } => {
                let caps = regex.captures(trailing)?;
                let mut out = HashMap::new();
                for name in regex.capture_names().flatten() {
                    if let Some(m) = caps.name(name) {
                        out.insert(name.to_owned(), m.as_str().to_owned());
                    }
                }
                Some(out)
            }
        }
    }

    /// Render for the help surface: `:x` -> `<x>`, `~x` -> `<x...>`.
    /// Literal/match-all/regex patterns are rendered as-is.
    pub fn help_render(&self) -> String {
        match self {
            Pattern::Literal(lit) => lit.clone(),
            Pattern::MatchAll => "*".to_owned(),
            Pattern::Regex { source, .. } => source.clone(),
            Pattern::Template { source, .. } => render_template_doc(source),
        }
    }
}

fn render_template_doc(template: &str) -> String {
    template
        .split_whitespace()
        .map(|tok| {
            if let Some(name) = tok.strip_prefix('~') {
                format!("<{name}...>")
            } else if let Some(rest) = tok.strip_prefix(':') {
                let name = rest.split('(').next().unwrap_or(rest);
                format!("<{name}>")
            } else {
                tok.to_owned()
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn compile_template_regex(template: &str, default_charclass: &str) -> Result<Regex, regex::Error> {
    let mut parts = Vec::new();
    for token in template.split_whitespace() {
        if let Some(rest) = token.strip_prefix(':') {
            let (name, class) = split_inline_regex(rest, default_charclass);
            parts.push(format!("(?P<{name}>{class})"));
        } else if let Some(name) = token.strip_prefix('~') {
            parts.push(format!("(?P<{name}>.+)"));
        } else {
            parts.push(regex::escape(token));
        }
    }
    let joined = parts.join(" ");
    Regex::new(&format!("^{joined}$"))
}

/// Split `name(regex)` / `name` into (name, charclass). A bare `:name`
/// placeholder uses `default_charclass`; `:name(X)` overrides it with
/// `X` verbatim.
fn split_inline_regex<'a>(token: &'a str, default_charclass: &'a str) -> (&'a str, &'a str) {
    match token.find('(') {
        Some(open) if token.ends_with(')') => (&token[..open], &token[open + 1..token.len() - 1]),
        _ => (token, default_charclass),
    }
}
