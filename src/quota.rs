use serde::Serialize;

use crate::config::QuotaConfig;

pub const QUOTA_SERVICE: &str = "dashboard";
pub const QUOTA_TARGET: &str = "dashboard";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum QuotaScope {
    Global,
    Org,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QuotaTag {
    pub service: &'static str,
    pub target: &'static str,
    pub scope: QuotaScope,
}

impl QuotaTag {
    pub fn dashboards(scope: QuotaScope) -> Self {
        Self {
            service: QUOTA_SERVICE,
            target: QUOTA_TARGET,
            scope,
        }
    }
}

/// Counts (usage or limits) keyed by quota tag.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QuotaMap {
    entries: Vec<(QuotaTag, i64)>,
}

impl QuotaMap {
    pub fn set(&mut self, tag: QuotaTag, value: i64) {
        match self.entries.iter_mut().find(|(existing, _)| *existing == tag) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((tag, value)),
        }
    }

    pub fn get(&self, scope: QuotaScope) -> Option<i64> {
        self.entries
            .iter()
            .find(|(tag, _)| tag.scope == scope)
            .map(|(_, value)| *value)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

pub fn default_limits(config: &QuotaConfig) -> QuotaMap {
    let mut limits = QuotaMap::default();
    limits.set(
        QuotaTag::dashboards(QuotaScope::Global),
        config.global_dashboards,
    );
    limits.set(QuotaTag::dashboards(QuotaScope::Org), config.org_dashboards);
    limits
}
