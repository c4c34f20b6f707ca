//! Dependency health and degradation modes

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Health of one registered dependency
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceStatus {
    Healthy,
    Unhealthy,
    /// Not checked yet
    Unknown,
}

/// Tracked state of a dependency
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceHealth {
    pub name: String,
    pub status: ServiceStatus,
    pub critical: bool,
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,
    pub last_check_time: Option<DateTime<Utc>>,
    pub last_success_time: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl ServiceHealth {
    pub fn new(name: impl Into<String>, critical: bool) -> Self {
        Self {
            name: name.into(),
            status: ServiceStatus::Unknown,
            critical,
            consecutive_failures: 0,
            consecutive_successes: 0,
            last_check_time: None,
            last_success_time: None,
            last_error: None,
        }
    }

    /// Apply a successful check
    ///
    /// An unhealthy dependency needs `recovery_threshold` consecutive
    /// successes; an unknown one becomes healthy at once.
    pub fn record_success(&mut self, recovery_threshold: u32, now: DateTime<Utc>) {
        self.consecutive_failures = 0;
        self.consecutive_successes = self.consecutive_successes.saturating_add(1);
        self.last_check_time = Some(now);
        self.last_success_time = Some(now);

        match self.status {
            ServiceStatus::Unhealthy if self.consecutive_successes >= recovery_threshold => {
                self.status = ServiceStatus::Healthy;
                self.last_error = None;
            }
            ServiceStatus::Unknown => self.status = ServiceStatus::Healthy,
            _ => {}
        }
    }

    /// Apply a failed check; unhealthy once `failure_threshold` is reached
    pub fn record_failure(&mut self, error: impl Into<String>, failure_threshold: u32, now: DateTime<Utc>) {
        self.consecutive_successes = 0;
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.last_check_time = Some(now);
        self.last_error = Some(error.into());

        if self.consecutive_failures >= failure_threshold {
            self.status = ServiceStatus::Unhealthy;
        }
    }

    /// Forget all history
    pub fn reset(&mut self) {
        *self = Self::new(std::mem::take(&mut self.name), self.critical);
    }

    pub fn is_unhealthy(&self) -> bool {
        self.status == ServiceStatus::Unhealthy
    }
}

/// Global severity computed from dependency health
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DegradationMode {
    #[default]
    Normal,
    /// Only non-critical dependencies are unhealthy
    Degraded,
    /// Some but not all critical dependencies are unhealthy
    Minimal,
    /// Every critical dependency is unhealthy
    Offline,
}

impl DegradationMode {
    pub const ALL: [Self; 4] = [Self::Normal, Self::Degraded, Self::Minimal, Self::Offline];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::Degraded => "degraded",
            Self::Minimal => "minimal",
            Self::Offline => "offline",
        }
    }

    /// Mode implied by a set of dependency health records
    ///
    /// `Offline` needs at least one critical dependency, all of them unhealthy.
    pub fn evaluate<'a>(services: impl IntoIterator<Item = &'a ServiceHealth>) -> Self {
        let mut critical_total = 0usize;
        let mut critical_unhealthy = 0usize;
        let mut any_unhealthy = false;

        for service in services {
            if service.critical {
                critical_total += 1;
            }
            if service.is_unhealthy() {
                any_unhealthy = true;
                if service.critical {
                    critical_unhealthy += 1;
                }
            }
        }

        if critical_total > 0 && critical_unhealthy == critical_total {
            Self::Offline
        } else if critical_unhealthy > 0 {
            Self::Minimal
        } else if any_unhealthy {
            Self::Degraded
        } else {
            Self::Normal
        }
    }
}

impl fmt::Display for DegradationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot returned by the degradation manager
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DegradationStatus {
    pub mode: DegradationMode,
    pub services: Vec<ServiceHealth>,
    pub available_features: Vec<String>,
    /// Entries waiting in each fallback queue
    pub fallback_depths: BTreeMap<String, usize>,
    pub evaluated_at: DateTime<Utc>,
}
