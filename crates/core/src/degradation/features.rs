//! Feature availability per degradation mode

use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};
use vigil_domain::constants::{
    ALL_FEATURES, FEATURE_ALERT_VIEWING, FEATURE_EVENT_REPLAY, FEATURE_EXPORTS,
};
use vigil_domain::DegradationMode;

/// Table mapping each mode to the features still offered
///
/// The default table serves everything in `normal`, read-oriented features in
/// `degraded`, alert viewing alone in `minimal` and nothing in `offline`.
/// Integrators replace rows with [`FeatureTable::with_mode`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureTable {
    modes: HashMap<DegradationMode, BTreeSet<String>>,
}

impl Default for FeatureTable {
    fn default() -> Self {
        Self::empty()
            .with_mode(DegradationMode::Normal, ALL_FEATURES)
            .with_mode(
                DegradationMode::Degraded,
                [FEATURE_ALERT_VIEWING, FEATURE_EVENT_REPLAY, FEATURE_EXPORTS],
            )
            .with_mode(DegradationMode::Minimal, [FEATURE_ALERT_VIEWING])
    }
}

impl FeatureTable {
    /// A table offering nothing in any mode
    pub fn empty() -> Self {
        Self { modes: HashMap::new() }
    }

    /// Replace the feature list for `mode`
    pub fn with_mode<I, S>(mut self, mode: DegradationMode, features: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.modes.insert(mode, features.into_iter().map(Into::into).collect());
        self
    }

    /// Features available in `mode`, sorted
    pub fn features(&self, mode: DegradationMode) -> Vec<String> {
        self.modes.get(&mode).map(|set| set.iter().cloned().collect()).unwrap_or_default()
    }

    pub fn is_available(&self, mode: DegradationMode, feature: &str) -> bool {
        self.modes.get(&mode).is_some_and(|set| set.contains(feature))
    }
}
