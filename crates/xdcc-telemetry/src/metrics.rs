//! Prometheus-backed statistics registry.
//!
//! # Design
//! - Every [`Statistic`] is one label of a single counter family, pre-registered
//!   at zero so the rendered output always lists the full set.
//! - Implements [`StatisticsSink`] so the tracker and the sessions record into it directly.

use std::sync::Arc;

use prometheus::{Encoder, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};
use xdcc_events::{Statistic, StatisticsSink};

use crate::error::{FamilyStage, Result, TelemetryError};

const STATISTICS_NAME: &str = "xdcc_statistics_total";
const ACTIVE_SESSIONS_NAME: &str = "xdcc_active_sessions";

/// Prometheus-backed metrics registry shared across tasks.
#[derive(Clone)]
pub struct Metrics {
    inner: Arc<MetricsInner>,
}

struct MetricsInner {
    registry: Registry,
    statistics_total: IntCounterVec,
    active_sessions: IntGauge,
}

impl Metrics {
    /// Construct a new metrics registry with the standard collectors registered.
    ///
    /// # Errors
    ///
    /// Returns an error if any of the Prometheus collectors cannot be built or
    /// registered.
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let statistics_total = IntCounterVec::new(
            Opts::new(STATISTICS_NAME, "Client statistics by counter"),
            &["statistic"],
        )
        .map_err(|source| TelemetryError::StatisticFamily {
            family: STATISTICS_NAME,
            stage: FamilyStage::Build,
            source,
        })?;
        let active_sessions = IntGauge::with_opts(Opts::new(
            ACTIVE_SESSIONS_NAME,
            "Download sessions currently streaming",
        ))
        .map_err(|source| TelemetryError::StatisticFamily {
            family: ACTIVE_SESSIONS_NAME,
            stage: FamilyStage::Build,
            source,
        })?;

        registry
            .register(Box::new(statistics_total.clone()))
            .map_err(|source| TelemetryError::StatisticFamily {
                family: STATISTICS_NAME,
                stage: FamilyStage::Register,
                source,
            })?;
        registry
            .register(Box::new(active_sessions.clone()))
            .map_err(|source| TelemetryError::StatisticFamily {
                family: ACTIVE_SESSIONS_NAME,
                stage: FamilyStage::Register,
                source,
            })?;

        for statistic in Statistic::ALL {
            statistics_total
                .with_label_values(&[statistic.as_str()])
                .reset();
        }

        Ok(Self {
            inner: Arc::new(MetricsInner {
                registry,
                statistics_total,
                active_sessions,
            }),
        })
    }

    /// Current value of one counter.
    #[must_use]
    pub fn statistic(&self, statistic: Statistic) -> u64 {
        self.inner
            .statistics_total
            .with_label_values(&[statistic.as_str()])
            .get()
    }

    /// Current number of streaming sessions.
    #[must_use]
    pub fn active_sessions(&self) -> i64 {
        self.inner.active_sessions.get()
    }

    /// Render the metrics registry using the Prometheus text exposition format.
    ///
    /// # Errors
    ///
    /// Returns an error if the metrics cannot be encoded or if the encoded
    /// buffer is not valid UTF-8.
    pub fn render(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.inner.registry.gather();
        let mut buffer = Vec::new();
        encoder
            .encode(&metric_families, &mut buffer)
            .map_err(|source| TelemetryError::StatisticsRender { source })?;
        String::from_utf8(buffer).map_err(|source| TelemetryError::StatisticsText { source })
    }
}

impl StatisticsSink for Metrics {
    fn increment(&self, statistic: Statistic, amount: u64) {
        self.inner
            .statistics_total
            .with_label_values(&[statistic.as_str()])
            .inc_by(amount);
    }

    fn set_active_sessions(&self, count: usize) {
        self.inner
            .active_sessions
            .set(i64::try_from(count).unwrap_or(i64::MAX));
    }
}
