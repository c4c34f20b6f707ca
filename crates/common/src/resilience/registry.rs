//! Name-keyed registry of circuit breakers
//!
//! Constructed once at the composition root and passed to whoever needs to
//! look breakers up by name (status endpoints, operational tooling). There is
//! no process-global instance.

use std::sync::Arc;

use dashmap::DashMap;

use super::circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerMetrics, ConfigResult,
};
use crate::observability::{MetricsCollector, NoOpMetricsCollector};

/// Registry handing out shared breakers by name
#[derive(Debug)]
pub struct CircuitBreakerRegistry {
    breakers: DashMap<String, Arc<CircuitBreaker>>,
    metrics: Arc<dyn MetricsCollector>,
}

impl Default for CircuitBreakerRegistry {
    fn default() -> Self {
        Self::new(Arc::new(NoOpMetricsCollector))
    }
}

impl CircuitBreakerRegistry {
    pub fn new(metrics: Arc<dyn MetricsCollector>) -> Self {
        Self { breakers: DashMap::new(), metrics }
    }

    /// Returns the breaker registered under `name`, creating it from `config`
    /// on first use
    ///
    /// The config is ignored when the breaker already exists.
    pub fn get_or_create(
        &self,
        name: &str,
        config: CircuitBreakerConfig,
    ) -> ConfigResult<Arc<CircuitBreaker>> {
        if let Some(existing) = self.breakers.get(name) {
            return Ok(Arc::clone(existing.value()));
        }

        let breaker =
            Arc::new(CircuitBreaker::new(name, config)?.with_metrics(Arc::clone(&self.metrics)));
        let entry = self.breakers.entry(name.to_string()).or_insert(breaker);
        Ok(Arc::clone(entry.value()))
    }

    /// Registers an externally built breaker, replacing any previous one
    pub fn insert(&self, breaker: Arc<CircuitBreaker>) {
        self.breakers.insert(breaker.name().to_string(), breaker);
    }

    pub fn get(&self, name: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.get(name).map(|entry| Arc::clone(entry.value()))
    }

    /// Metrics for every registered breaker, sorted by name
    pub fn snapshot(&self) -> Vec<CircuitBreakerMetrics> {
        let mut all: Vec<_> = self.breakers.iter().map(|entry| entry.value().get_metrics()).collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        all
    }

    /// Force every breaker closed
    pub fn reset_all(&self) {
        for entry in &self.breakers {
            entry.value().reset();
        }
    }

    pub fn len(&self) -> usize {
        self.breakers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.breakers.is_empty()
    }
}
