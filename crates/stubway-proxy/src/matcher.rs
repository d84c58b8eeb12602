//! Route pattern compilation.
//!
//! Config sections declare route-style path patterns (`/users/:id`,
//! `/api/*`). Each pattern is compiled once into an anchored regex at
//! configuration load time; a pattern that fails to compile fails the
//! load rather than being skipped silently.

use regex::Regex;

/// A route pattern compiled to an anchored regex.
#[derive(Debug, Clone)]
pub struct CompiledPattern {
    source: String,
    regex: Regex,
}

/// Pattern syntax error raised at configuration load time.
#[derive(Debug, thiserror::Error)]
#[error("invalid route pattern {pattern:?}: {reason}")]
pub struct PatternError {
    pub pattern: String,
    pub reason: String,
}

impl CompiledPattern {
    /// Compile a route pattern.
    ///
    /// Supported syntax per path segment:
    /// - literal text, matched verbatim
    /// - `:name` - a named parameter matching one segment
    /// - `*` - a wildcard matching the rest of the path
    pub fn compile(pattern: &str) -> Result<Self, PatternError> {
        let err = |reason: &str| PatternError {
            pattern: pattern.to_string(),
            reason: reason.to_string(),
        };

        if !pattern.starts_with('/') {
            return Err(err("pattern must start with '/'"));
        }

        let mut expr = String::from("^");
        let segments: Vec<&str> = pattern[1..].split('/').collect();
        for (i, segment) in segments.iter().enumerate() {
            if let Some(name) = segment.strip_prefix(':') {
                if name.is_empty() {
                    return Err(err("named parameter is missing a name"));
                }
                if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
                    return Err(err("named parameter may only contain [A-Za-z0-9_]"));
                }
                expr.push_str("/([^/]+)");
            } else if *segment == "*" {
                if i != segments.len() - 1 {
                    return Err(err("'*' is only allowed as the final segment"));
                }
                expr.push_str("(?:/.*)?");
            } else if segment.contains('*') || segment.contains(':') {
                return Err(err("'*' and ':name' must span a whole segment"));
            } else {
                expr.push('/');
                expr.push_str(&regex::escape(segment));
            }
        }
        expr.push_str("/?$");

        let regex = Regex::new(&expr).map_err(|e| err(&e.to_string()))?;
        Ok(Self {
            source: pattern.to_string(),
            regex,
        })
    }

    /// Match against a URL path (query excluded).
    pub fn matches(&self, path: &str) -> bool {
        self.regex.is_match(path)
    }

    /// The pattern as declared in configuration.
    pub fn source(&self) -> &str {
        &self.source
    }
}
