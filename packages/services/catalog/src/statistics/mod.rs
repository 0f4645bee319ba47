use std::collections::BTreeMap;
use std::future::Future;

use crate::catalog::CatalogStore;
use crate::models::*;

/// What `refresh` produced.
#[derive(Debug, Clone, PartialEq)]
pub enum RefreshOutcome {
    Fresh(StatisticsSnapshot),
    /// Computing or persisting failed; this is the last good snapshot.
    Stale { snapshot: StatisticsSnapshot, error: String },
}

impl RefreshOutcome {
    pub fn snapshot(&self) -> &StatisticsSnapshot {
        match self {
            RefreshOutcome::Fresh(snapshot) | RefreshOutcome::Stale { snapshot, .. } => snapshot,
        }
    }

    pub fn is_stale(&self) -> bool {
        matches!(self, RefreshOutcome::Stale { .. })
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            RefreshOutcome::Stale { error, .. } => Some(error),
            RefreshOutcome::Fresh(_) => None,
        }
    }
}

#[derive(Clone)]
pub struct StatisticsAggregator {
    store: CatalogStore,
    top_n: usize,
}

impl StatisticsAggregator {
    pub fn new(store: CatalogStore, top_n: usize) -> Self {
        Self { store, top_n }
    }

    /// Computes every metric group independently. A group that fails is
    /// replaced by its error marker; only when all of them fail is the
    /// computation itself an error.
    pub async fn compute(&self) -> Result<StatisticsReport> {
        let report = StatisticsReport {
            general: group("general", self.general()).await,
            body_types: group("body_types", self.body_types()).await,
            top_brands: group("top_brands", self.top_brands()).await,
        };
        if report.is_total_failure() {
            return Err(CatalogError::StatisticsUnavailable(format!(
                "every metric group failed: {}",
                report.general.error().unwrap_or("unknown error")
            )));
        }
        Ok(report)
    }

    async fn general(&self) -> Result<GeneralStats> {
        let backend = self.store.backend();
        Ok(GeneralStats {
            total_brands: backend.count(EntityKind::Brand).await?,
            total_models: backend.count(EntityKind::CarModel).await?,
            total_body_types: backend.count(EntityKind::BodyType).await?,
            total_configurations: backend.count(EntityKind::Configuration).await?,
            total_cars: backend.count(EntityKind::Car).await?,
            calculation_time: chrono::Utc::now().to_rfc3339(),
        })
    }

    async fn body_types(&self) -> Result<BTreeMap<String, i64>> {
        let rows = self.store.backend().body_type_distribution().await?;
        Ok(rows.into_iter().map(|r| (r.name, r.car_count)).collect())
    }

    async fn top_brands(&self) -> Result<Vec<BrandRanking>> {
        self.store.backend().top_brands(self.top_n).await
    }

    pub async fn persist(&self, actor: &ActorContext, report: StatisticsReport) -> Result<StatisticsSnapshot> {
        let snapshot = self.store.persist_snapshot(actor, report).await?;
        tracing::info!(
            snapshot_id = %snapshot.id.map(|id| id.to_hex()).unwrap_or_default(),
            failed_groups = ?snapshot.data.failed_groups(),
            "Statistics snapshot saved"
        );
        Ok(snapshot)
    }

    pub async fn latest(&self) -> Result<StatisticsSnapshot> {
        self.store
            .latest_snapshot()
            .await?
            .ok_or_else(|| CatalogError::NotFound("No statistics available".to_string()))
    }

    /// Compute, then persist. On failure falls back to the newest stored
    /// snapshot; with nothing to fall back to the result is
    /// `StatisticsUnavailable`.
    pub async fn refresh(&self, actor: &ActorContext) -> Result<RefreshOutcome> {
        let attempt = async {
            let report = self.compute().await?;
            self.persist(actor, report).await
        };
        let error = match attempt.await {
            Ok(snapshot) => return Ok(RefreshOutcome::Fresh(snapshot)),
            Err(e) => e,
        };

        tracing::error!(error = %error, "Statistics refresh failed; falling back to last snapshot");
        match self.store.latest_snapshot().await {
            Ok(Some(snapshot)) => Ok(RefreshOutcome::Stale { snapshot, error: error.to_string() }),
            Ok(None) => Err(CatalogError::StatisticsUnavailable(error.to_string())),
            Err(fallback) => {
                tracing::error!(error = %fallback, "Could not load last statistics snapshot");
                Err(CatalogError::StatisticsUnavailable(error.to_string()))
            }
        }
    }
}

async fn group<T, F>(name: &'static str, fut: F) -> MetricGroup<T>
where
    F: Future<Output = Result<T>>,
{
    match fut.await {
        Ok(value) => {
            tracing::debug!(group = name, "Metric group calculated");
            MetricGroup::Ready(value)
        }
        Err(e) => {
            tracing::error!(group = name, error = %e, "Metric group failed");
            MetricGroup::Failed { error: e.to_string() }
        }
    }
}
