//! Label matcher evaluation shared by routing, inhibition and silencing.
//!
//! Regex matchers are compiled once and cached behind a thread-safe LRU,
//! the same pattern the donor codebase uses for its firewall's domain-regex
//! cache (compile-on-miss, reuse on hit, bound the cache size).

use std::collections::HashMap;
use std::sync::Arc;

use lru::LruCache;
use parking_lot::Mutex;
use regex::Regex;

use crate::error::{AppError, AppResult};
use crate::model::{MatchOp, Matcher};

/// Regex patterns longer than this are rejected at parse time (spec §3).
pub const MAX_REGEX_PATTERN_LEN: usize = 1024;

/// Thread-safe cache of compiled regexes, shared by every matcher
/// evaluation site (routing, inhibition, silences).
pub struct RegexCache {
    cache: Mutex<LruCache<String, Arc<Regex>>>,
}

impl RegexCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            cache: Mutex::new(LruCache::new(
                std::num::NonZeroUsize::new(capacity.max(1)).unwrap(),
            )),
        }
    }

    pub fn compile(&self, pattern: &str) -> AppResult<Arc<Regex>> {
        if pattern.len() > MAX_REGEX_PATTERN_LEN {
            return Err(AppError::validation(
                "compile_regex",
                format!("pattern exceeds {MAX_REGEX_PATTERN_LEN} chars"),
            ));
        }

        let mut cache = self.cache.lock();
        if let Some(re) = cache.get(pattern) {
            return Ok(re.clone());
        }

        let anchored = format!("^(?:{pattern})$");
        let compiled = Regex::new(&anchored)
            .map_err(|e| AppError::validation("compile_regex", e.to_string()))?;
        let compiled = Arc::new(compiled);
        cache.put(pattern.to_string(), compiled.clone());
        Ok(compiled)
    }
}

impl Default for RegexCache {
    fn default() -> Self {
        Self::new(1000)
    }
}

/// Evaluates a single matcher against a label set, implementing the
/// missing-label semantics from spec §3: `=` fails on missing, `!=`
/// succeeds, `=~` fails, `!~` succeeds.
pub fn matches_one(
    matcher: &Matcher,
    labels: &HashMap<String, String>,
    regex_cache: &RegexCache,
) -> AppResult<bool> {
    let value = labels.get(&matcher.name);

    Ok(match matcher.op {
        MatchOp::Eq => value.map_or(false, |v| v == &matcher.value),
        MatchOp::NotEq => value.map_or(true, |v| v != &matcher.value),
        MatchOp::Regex => match value {
            Some(v) => regex_cache.compile(&matcher.value)?.is_match(v),
            None => false,
        },
        MatchOp::NotRegex => match value {
            Some(v) => !regex_cache.compile(&matcher.value)?.is_match(v),
            None => true,
        },
    })
}

/// AND over all matchers; an empty matcher list always matches.
pub fn matches_all(
    matchers: &[Matcher],
    labels: &HashMap<String, String>,
    regex_cache: &RegexCache,
) -> AppResult<bool> {
    for m in matchers {
        if !matches_one(m, labels, regex_cache)? {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Parses the Alertmanager string form `labelname=value` / `!=` / `=~` / `!~`
/// with backslash escaping of `"` inside a quoted value.
pub fn parse_matcher_string(raw: &str) -> AppResult<Matcher> {
    let ops: &[(&str, MatchOp)] = &[
        ("!~", MatchOp::NotRegex),
        ("=~", MatchOp::Regex),
        ("!=", MatchOp::NotEq),
        ("=", MatchOp::Eq),
    ];

    for (token, op) in ops {
        if let Some(idx) = raw.find(token) {
            let name = raw[..idx].trim().to_string();
            let mut value = raw[idx + token.len()..].trim().to_string();
            if value.starts_with('"') && value.ends_with('"') && value.len() >= 2 {
                value = value[1..value.len() - 1].replace("\\\"", "\"");
            }
            if name.is_empty() {
                return Err(AppError::validation("parse_matcher", "empty label name"));
            }
            return Ok(Matcher {
                name,
                op: *op,
                value,
            });
        }
    }

    Err(AppError::validation(
        "parse_matcher",
        format!("no operator found in matcher '{raw}'"),
    ))
}
