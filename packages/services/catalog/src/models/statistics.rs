use std::collections::BTreeMap;

use mongodb::bson::{oid::ObjectId, DateTime as BsonDateTime};
use serde::{Deserialize, Serialize};

use crate::models::{AuditSubject, EntityKind};

/// One metric group of a report. A group that failed to compute keeps its
/// slot and carries the error instead of a value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetricGroup<T> {
    Failed { error: String },
    Ready(T),
}

impl<T> MetricGroup<T> {
    pub fn is_failed(&self) -> bool {
        matches!(self, MetricGroup::Failed { .. })
    }

    pub fn value(&self) -> Option<&T> {
        match self {
            MetricGroup::Ready(v) => Some(v),
            MetricGroup::Failed { .. } => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            MetricGroup::Failed { error } => Some(error),
            MetricGroup::Ready(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneralStats {
    pub total_brands: i64,
    pub total_models: i64,
    pub total_body_types: i64,
    pub total_configurations: i64,
    pub total_cars: i64,
    pub calculation_time: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrandRanking {
    pub brand: String,
    pub car_count: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BodyTypeCount {
    pub name: String,
    pub car_count: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatisticsReport {
    pub general: MetricGroup<GeneralStats>,
    pub body_types: MetricGroup<BTreeMap<String, i64>>,
    pub top_brands: MetricGroup<Vec<BrandRanking>>,
}

impl StatisticsReport {
    pub fn failed_groups(&self) -> Vec<&'static str> {
        let mut failed = Vec::new();
        if self.general.is_failed() { failed.push("general"); }
        if self.body_types.is_failed() { failed.push("body_types"); }
        if self.top_brands.is_failed() { failed.push("top_brands"); }
        failed
    }

    pub fn is_total_failure(&self) -> bool {
        self.failed_groups().len() == 3
    }
}

/// Persisted report. Append-only; the newest `created_at` wins on read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatisticsSnapshot {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub data: StatisticsReport,
    pub created_at: BsonDateTime,
}

impl StatisticsSnapshot {
    pub fn new(data: StatisticsReport) -> Self {
        Self { id: None, data, created_at: BsonDateTime::now() }
    }

    pub fn created_at_rfc3339(&self) -> String {
        self.created_at.to_chrono().to_rfc3339()
    }
}

impl AuditSubject for StatisticsSnapshot {
    fn kind(&self) -> EntityKind { EntityKind::Statistic }
    fn entity_id(&self) -> Option<ObjectId> { self.id }
    fn audit_fields(&self) -> BTreeMap<&'static str, String> {
        BTreeMap::from([
            ("id", self.id.map(|id| id.to_hex()).unwrap_or_else(|| "null".to_string())),
            ("data", serde_json::to_string(&self.data).unwrap_or_default()),
            ("created_at", self.created_at_rfc3339()),
        ])
    }
}
