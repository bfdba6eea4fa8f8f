use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use crate::config::DashboardConfig;

/// One independently polled backend data source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Feed {
    Overview,
    Maintenance,
    Anomaly,
    Yield,
    Statistics,
    MachineHealth,
}

impl Feed {
    pub const ALL: [Feed; 6] = [
        Feed::Overview,
        Feed::Maintenance,
        Feed::Anomaly,
        Feed::Yield,
        Feed::Statistics,
        Feed::MachineHealth,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Feed::Overview => "overview",
            Feed::Maintenance => "maintenance",
            Feed::Anomaly => "anomaly",
            Feed::Yield => "yield",
            Feed::Statistics => "statistics",
            Feed::MachineHealth => "machine_health",
        }
    }

    /// Backend path relative to the configured base URL.
    pub fn path(&self) -> &'static str {
        match self {
            Feed::Overview | Feed::MachineHealth => "/machine_health",
            Feed::Maintenance => "/predict_failure",
            Feed::Anomaly => "/detect_anomaly",
            Feed::Yield => "/predict_yield",
            Feed::Statistics => "/statistics",
        }
    }

    /// Polling cadence for this feed. `None` means the feed is only fetched
    /// on cold start and on manual refresh.
    pub fn poll_interval(&self, config: &DashboardConfig) -> Option<Duration> {
        let ms = match self {
            Feed::Maintenance | Feed::Anomaly | Feed::Yield => config.fast_poll_interval_ms,
            Feed::Overview | Feed::Statistics => config.slow_poll_interval_ms,
            Feed::MachineHealth => config.notification_poll_interval_ms,
        };
        (ms > 0).then(|| Duration::from_millis(ms))
    }
}

impl fmt::Display for Feed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One machine's telemetry row as reported by `/machine_health`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MachineSnapshot {
    pub machine_id: String,
    pub health_score: f64,
    pub failure_probability: f64,
    #[serde(default)]
    pub health_status: String,
    #[serde(default)]
    pub yield_efficiency: f64,
    #[serde(default)]
    pub cluster: i32,
    #[serde(default)]
    pub is_anomalous: bool,
    #[serde(default)]
    pub temperature: f64,
    #[serde(default)]
    pub vibration: f64,
    #[serde(default)]
    pub pressure: f64,
    #[serde(default)]
    pub speed: f64,
    #[serde(default)]
    pub runtime_hours: f64,
    #[serde(default)]
    pub last_update: Option<String>,
}

/// `/machine_health` response. Also accepts a bare array of machine rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "serde_json::Value")]
pub struct MachineHealthReport {
    pub timestamp: Option<String>,
    pub total_machines: u32,
    pub average_health_score: f64,
    pub good_health: u32,
    pub fair_health: u32,
    pub critical_health: u32,
    pub machines: Vec<MachineSnapshot>,
}

#[derive(Deserialize)]
struct MachineHealthBody {
    #[serde(default)]
    timestamp: Option<String>,
    #[serde(default)]
    total_machines: u32,
    #[serde(default)]
    average_health_score: f64,
    #[serde(default)]
    good_health: u32,
    #[serde(default)]
    fair_health: u32,
    #[serde(default)]
    critical_health: u32,
    #[serde(default)]
    machines: Vec<MachineSnapshot>,
}

impl TryFrom<serde_json::Value> for MachineHealthReport {
    type Error = serde_json::Error;

    // Branch on the JSON shape up front so a bad row reports its own error.
    fn try_from(value: serde_json::Value) -> Result<Self, Self::Error> {
        if value.is_array() {
            return Ok(Self::from_rows(serde_json::from_value(value)?));
        }
        let body: MachineHealthBody = serde_json::from_value(value)?;
        Ok(Self {
            timestamp: body.timestamp,
            total_machines: body.total_machines,
            average_health_score: body.average_health_score,
            good_health: body.good_health,
            fair_health: body.fair_health,
            critical_health: body.critical_health,
            machines: body.machines,
        })
    }
}

impl MachineHealthReport {
    /// Builds a report from bare rows, deriving the counts and average.
    fn from_rows(machines: Vec<MachineSnapshot>) -> Self {
        let count_status =
            |status: &str| machines.iter().filter(|m| m.health_status == status).count() as u32;
        let average_health_score = if machines.is_empty() {
            0.0
        } else {
            machines.iter().map(|m| m.health_score).sum::<f64>() / machines.len() as f64
        };
        Self {
            timestamp: None,
            total_machines: machines.len() as u32,
            average_health_score,
            good_health: count_status("Good"),
            fair_health: count_status("Fair"),
            critical_health: count_status("Critical"),
            machines,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RiskLevel {
    High,
    Medium,
    Low,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailurePrediction {
    pub machine_id: String,
    pub failure_probability: f64,
    pub risk_level: RiskLevel,
    #[serde(default)]
    pub recommendation: String,
    #[serde(default)]
    pub temperature: f64,
    #[serde(default)]
    pub vibration: f64,
    #[serde(default)]
    pub pressure: f64,
    #[serde(default)]
    pub runtime_hours: f64,
}

/// `/predict_failure` response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailurePredictionReport {
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub total_machines: u32,
    pub high_risk: u32,
    pub medium_risk: u32,
    pub low_risk: u32,
    #[serde(default)]
    pub predictions: Vec<FailurePrediction>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyResult {
    pub machine_id: String,
    pub cluster: i32,
    #[serde(default)]
    pub cluster_name: String,
    pub is_anomalous: bool,
    #[serde(default)]
    pub temperature: f64,
    #[serde(default)]
    pub vibration: f64,
    #[serde(default)]
    pub pressure: f64,
    #[serde(default)]
    pub speed: f64,
}

/// `/detect_anomaly` response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyReport {
    #[serde(default)]
    pub timestamp: Option<String>,
    pub total_machines: u32,
    pub anomalous_machines: u32,
    #[serde(default)]
    pub cluster_distribution: BTreeMap<String, u32>,
    #[serde(default)]
    pub results: Vec<AnomalyResult>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct YieldPrediction {
    pub machine_id: String,
    #[serde(default)]
    pub predicted_yield: f64,
    pub efficiency_percentage: f64,
    #[serde(default)]
    pub performance_level: String,
    #[serde(default)]
    pub temperature: f64,
    #[serde(default)]
    pub pressure: f64,
    #[serde(default)]
    pub speed: f64,
}

/// `/predict_yield` response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct YieldReport {
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub total_machines: u32,
    pub average_efficiency: f64,
    #[serde(default)]
    pub predictions: Vec<YieldPrediction>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: String,
    pub end: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AverageMetrics {
    #[serde(default)]
    pub temperature: f64,
    #[serde(default)]
    pub vibration: f64,
    #[serde(default)]
    pub pressure: f64,
    #[serde(default)]
    pub speed: f64,
    #[serde(default)]
    pub runtime_hours: f64,
}

/// `/statistics` response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactoryStatistics {
    pub total_machines: u32,
    #[serde(default)]
    pub total_samples: u64,
    #[serde(default)]
    pub total_failures: u64,
    #[serde(default)]
    pub failure_rate_percentage: f64,
    #[serde(default)]
    pub date_range: Option<DateRange>,
    #[serde(default)]
    pub average_metrics: Option<AverageMetrics>,
}

/// A decoded payload for one feed.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "feed", content = "data", rename_all = "snake_case")]
pub enum FeedPayload {
    Overview(MachineHealthReport),
    Maintenance(FailurePredictionReport),
    Anomaly(AnomalyReport),
    Yield(YieldReport),
    Statistics(FactoryStatistics),
    MachineHealth(MachineHealthReport),
}

impl FeedPayload {
    pub fn feed(&self) -> Feed {
        match self {
            FeedPayload::Overview(_) => Feed::Overview,
            FeedPayload::Maintenance(_) => Feed::Maintenance,
            FeedPayload::Anomaly(_) => Feed::Anomaly,
            FeedPayload::Yield(_) => Feed::Yield,
            FeedPayload::Statistics(_) => Feed::Statistics,
            FeedPayload::MachineHealth(_) => Feed::MachineHealth,
        }
    }

    /// Decodes a response body into the payload shape expected for `feed`.
    pub fn decode(feed: Feed, body: &[u8]) -> Result<Self, serde_json::Error> {
        Ok(match feed {
            Feed::Overview => FeedPayload::Overview(serde_json::from_slice(body)?),
            Feed::Maintenance => FeedPayload::Maintenance(serde_json::from_slice(body)?),
            Feed::Anomaly => FeedPayload::Anomaly(serde_json::from_slice(body)?),
            Feed::Yield => FeedPayload::Yield(serde_json::from_slice(body)?),
            Feed::Statistics => FeedPayload::Statistics(serde_json::from_slice(body)?),
            Feed::MachineHealth => FeedPayload::MachineHealth(serde_json::from_slice(body)?),
        })
    }

    /// Machine rows carried by health payloads.
    pub fn machines(&self) -> Option<&[MachineSnapshot]> {
        match self {
            FeedPayload::Overview(report) | FeedPayload::MachineHealth(report) => {
                Some(&report.machines)
            }
            _ => None,
        }
    }
}
