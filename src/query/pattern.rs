//! SQL `LIKE` matching with a bounded cache of compiled patterns.

use crate::core::{DbError, Result};
use lru::LruCache;
use regex::{Regex, RegexBuilder};
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};

const PATTERN_CACHE_SIZE: usize = 128;

lazy_static::lazy_static! {
    static ref PATTERN_CACHE: Mutex<LruCache<(bool, String), Arc<Regex>>> = Mutex::new(
        LruCache::new(NonZeroUsize::new(PATTERN_CACHE_SIZE).expect("cache size is non-zero"))
    );
}

/// Translates `%` / `_` wildcards (with `\` escapes) into an anchored regex.
fn like_to_regex(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len() + 2);
    out.push('^');

    let mut chars = pattern.chars();
    while let Some(ch) = chars.next() {
        match ch {
            '%' => out.push_str(".*"),
            '_' => out.push('.'),
            '\\' => match chars.next() {
                Some(escaped) => out.push_str(&regex::escape(&escaped.to_string())),
                None => out.push_str(&regex::escape("\\")),
            },
            other => out.push_str(&regex::escape(&other.to_string())),
        }
    }

    out.push('$');
    out
}

/// Plain prefix / suffix / substring / exact patterns skip the regex engine.
fn fast_path(text: &str, pattern: &str, case_sensitive: bool) -> Option<bool> {
    if pattern.contains('_') || pattern.contains('\\') {
        return None;
    }

    let (text, pattern) = if case_sensitive {
        (text.to_string(), pattern.to_string())
    } else {
        (text.to_lowercase(), pattern.to_lowercase())
    };

    let wildcards = pattern.matches('%').count();
    match wildcards {
        0 => Some(text == pattern),
        1 if pattern.ends_with('%') => Some(text.starts_with(&pattern[..pattern.len() - 1])),
        1 if pattern.starts_with('%') => Some(text.ends_with(&pattern[1..])),
        2 if pattern.len() >= 2 && pattern.starts_with('%') && pattern.ends_with('%') => {
            Some(text.contains(&pattern[1..pattern.len() - 1]))
        }
        _ => None,
    }
}

fn compiled(pattern: &str, case_sensitive: bool) -> Result<Arc<Regex>> {
    let key = (case_sensitive, pattern.to_string());

    if let Some(regex) = PATTERN_CACHE.lock()?.get(&key) {
        return Ok(Arc::clone(regex));
    }

    let regex = RegexBuilder::new(&like_to_regex(pattern))
        .case_insensitive(!case_sensitive)
        .build()
        .map_err(|e| DbError::ExecutionError(format!("Invalid LIKE pattern '{}': {}", pattern, e)))?;
    let regex = Arc::new(regex);

    PATTERN_CACHE.lock()?.put(key, Arc::clone(&regex));
    Ok(regex)
}

pub fn eval_like(text: &str, pattern: &str, case_sensitive: bool) -> Result<bool> {
    if let Some(matched) = fast_path(text, pattern, case_sensitive) {
        return Ok(matched);
    }
    Ok(compiled(pattern, case_sensitive)?.is_match(text))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fast_paths() {
        assert!(eval_like("User 5", "%User%", true).unwrap());
        assert!(eval_like("User 5", "User%", true).unwrap());
        assert!(eval_like("User 5", "%5", true).unwrap());
        assert!(!eval_like("Arthur", "%User%", true).unwrap());
    }

    #[test]
    fn test_regex_path() {
        assert!(eval_like("Jalan A", "Jalan _", true).unwrap());
        assert!(eval_like("a.b", "a.b", true).unwrap());
        assert!(!eval_like("axb", "a.b", true).unwrap());
        assert!(eval_like("50%", "50\\%", true).unwrap());
    }

    #[test]
    fn test_case_insensitive() {
        assert!(eval_like("JANE", "%ane", false).unwrap());
        assert!(!eval_like("JANE", "%ane", true).unwrap());
    }
}
