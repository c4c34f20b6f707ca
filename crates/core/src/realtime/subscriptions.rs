//! Subscription filtering
//!
//! Patterns use shell-glob wildcards (`*`, `?`) and match case-insensitively.
//! A connection without an explicit subscription receives every event; once
//! it subscribes, only matching events are delivered, and an emptied explicit
//! set receives nothing.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;

use parking_lot::Mutex;
use regex::Regex;
use tracing::debug;
use vigil_domain::{Result, VigilError};

/// A compiled, lowercase glob pattern
#[derive(Clone)]
pub struct GlobPattern {
    raw: String,
    matcher: Option<Regex>,
}

impl GlobPattern {
    pub fn new(pattern: &str) -> Result<Self> {
        let raw = pattern.trim().to_lowercase();
        if raw.is_empty() {
            return Err(VigilError::Validation("subscription pattern must not be empty".into()));
        }
        if raw == "*" {
            return Ok(Self { raw, matcher: None });
        }

        let mut source = String::with_capacity(raw.len() + 8);
        source.push('^');
        for ch in raw.chars() {
            match ch {
                '*' => source.push_str(".*"),
                '?' => source.push('.'),
                other => source.push_str(&regex::escape(other.encode_utf8(&mut [0; 4]))),
            }
        }
        source.push('$');

        let matcher = Regex::new(&source)
            .map_err(|e| VigilError::Validation(format!("invalid pattern '{}': {}", pattern, e)))?;
        Ok(Self { raw, matcher: Some(matcher) })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Match an event type, ignoring case
    pub fn matches(&self, event_type: &str) -> bool {
        match &self.matcher {
            None => true,
            Some(matcher) => matcher.is_match(&event_type.to_lowercase()),
        }
    }
}

impl fmt::Debug for GlobPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("GlobPattern").field(&self.raw).finish()
    }
}

#[derive(Debug, Default)]
struct ConnectionSubscription {
    patterns: BTreeMap<String, GlobPattern>,
    explicit: bool,
}

impl ConnectionSubscription {
    fn wants(&self, event_type: &str) -> bool {
        !self.explicit || self.patterns.values().any(|p| p.matches(event_type))
    }
}

/// Interest patterns for every live connection
#[derive(Debug, Default)]
pub struct SubscriptionManager {
    connections: Mutex<HashMap<String, ConnectionSubscription>>,
}

impl SubscriptionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a connection; it receives everything until it subscribes
    pub fn register_connection(&self, id: &str) {
        self.connections.lock().entry(id.to_string()).or_default();
    }

    /// Add patterns and switch the connection to explicit filtering
    ///
    /// Returns the normalized patterns that were accepted. Invalid patterns
    /// are skipped.
    pub fn subscribe(&self, id: &str, patterns: &[String]) -> Result<Vec<String>> {
        let compiled: Vec<GlobPattern> = patterns
            .iter()
            .filter_map(|p| match GlobPattern::new(p) {
                Ok(pattern) => Some(pattern),
                Err(e) => {
                    debug!(connection_id = id, error = %e, "Skipping subscription pattern");
                    None
                }
            })
            .collect();

        let mut connections = self.connections.lock();
        let subscription = connections
            .get_mut(id)
            .ok_or_else(|| VigilError::NotFound(format!("connection '{}'", id)))?;

        subscription.explicit = true;
        let mut accepted = Vec::with_capacity(compiled.len());
        for pattern in compiled {
            accepted.push(pattern.as_str().to_string());
            subscription.patterns.insert(pattern.as_str().to_string(), pattern);
        }
        accepted.dedup();
        Ok(accepted)
    }

    /// Remove the given patterns, or every pattern and the explicit flag
    ///
    /// Returns the patterns that were removed.
    pub fn unsubscribe(&self, id: &str, patterns: Option<&[String]>) -> Result<Vec<String>> {
        let mut connections = self.connections.lock();
        let subscription = connections
            .get_mut(id)
            .ok_or_else(|| VigilError::NotFound(format!("connection '{}'", id)))?;

        match patterns {
            None => {
                subscription.explicit = false;
                Ok(std::mem::take(&mut subscription.patterns).into_keys().collect())
            }
            Some(patterns) => Ok(patterns
                .iter()
                .map(|p| p.trim().to_lowercase())
                .filter(|p| subscription.patterns.remove(p).is_some())
                .collect()),
        }
    }

    /// Whether `event_type` should go to connection `id`
    ///
    /// An unknown connection has no explicit subscription, so it gets
    /// everything.
    pub fn should_send(&self, id: &str, event_type: &str) -> bool {
        match self.connections.lock().get(id) {
            Some(subscription) => subscription.wants(event_type),
            None => true,
        }
    }

    /// Every connection that should receive `event_type`
    pub fn get_recipients(&self, event_type: &str) -> HashSet<String> {
        self.connections
            .lock()
            .iter()
            .filter(|(_, subscription)| subscription.wants(event_type))
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Current patterns of a connection, sorted
    pub fn patterns(&self, id: &str) -> Option<Vec<String>> {
        self.connections.lock().get(id).map(|s| s.patterns.keys().cloned().collect())
    }

    pub fn has_explicit_subscription(&self, id: &str) -> bool {
        self.connections.lock().get(id).is_some_and(|s| s.explicit)
    }

    pub fn remove_connection(&self, id: &str) -> bool {
        self.connections.lock().remove(id).is_some()
    }

    pub fn connection_count(&self) -> usize {
        self.connections.lock().len()
    }
}
