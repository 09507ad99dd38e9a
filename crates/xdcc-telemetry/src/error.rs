//! Error types for telemetry operations.

use std::error::Error;
use std::fmt::{self, Display, Formatter};

use prometheus::Error as PrometheusError;

/// Result alias for telemetry operations.
pub type Result<T> = std::result::Result<T, TelemetryError>;

/// Step at which a statistics family failed to come up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FamilyStage {
    /// Constructing the counter or gauge.
    Build,
    /// Adding it to the shared registry.
    Register,
}

impl FamilyStage {
    /// Stable label used in log fields.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Build => "build",
            Self::Register => "register",
        }
    }
}

/// Errors raised while wiring up logging or the client statistics.
#[derive(Debug)]
pub enum TelemetryError {
    /// A global log subscriber was already installed.
    LogSubscriber {
        /// Underlying tracing subscriber error.
        source: tracing_subscriber::util::TryInitError,
    },
    /// One of the statistics families (`xdcc_statistics_total`,
    /// `xdcc_active_sessions`) could not be set up.
    StatisticFamily {
        /// Family name as it appears in the exposition.
        family: &'static str,
        /// Step that failed.
        stage: FamilyStage,
        /// Underlying Prometheus error.
        source: PrometheusError,
    },
    /// The statistics snapshot could not be rendered to text.
    StatisticsRender {
        /// Underlying Prometheus error.
        source: PrometheusError,
    },
    /// The rendered statistics snapshot was not UTF-8.
    StatisticsText {
        /// Underlying UTF-8 conversion error.
        source: std::string::FromUtf8Error,
    },
}

impl TelemetryError {
    /// Name of the statistics family involved, if any.
    #[must_use]
    pub fn family(&self) -> Option<&'static str> {
        match self {
            Self::StatisticFamily { family, .. } => Some(*family),
            _ => None,
        }
    }
}

impl Display for TelemetryError {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::LogSubscriber { .. } => formatter.write_str("log subscriber already installed"),
            Self::StatisticFamily {
                stage: FamilyStage::Build,
                ..
            } => formatter.write_str("failed to build statistics family"),
            Self::StatisticFamily {
                stage: FamilyStage::Register,
                ..
            } => formatter.write_str("failed to register statistics family"),
            Self::StatisticsRender { .. } => {
                formatter.write_str("failed to render statistics snapshot")
            }
            Self::StatisticsText { .. } => {
                formatter.write_str("statistics snapshot was not valid utf-8")
            }
        }
    }
}

impl Error for TelemetryError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::LogSubscriber { source } => Some(source),
            Self::StatisticFamily { source, .. } | Self::StatisticsRender { source } => {
                Some(source)
            }
            Self::StatisticsText { source } => Some(source),
        }
    }
}
