//! Per-view summaries computed from cached payloads.
//!
//! Everything here is a pure function of a payload (and, for freshness, the
//! clock), so presentation can recompute on every read.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::cmp::Ordering;
use std::time::Duration;

use crate::models::{
    AnomalyReport, AnomalyResult, FailurePrediction, FailurePredictionReport, MachineHealthReport,
    YieldPrediction, YieldReport,
};

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct HealthDistribution {
    pub good: u32,
    pub fair: u32,
    pub critical: u32,
    pub good_percent: f64,
    pub fair_percent: f64,
    pub critical_percent: f64,
    /// Share of healthy machines among the categorised ones, rounded.
    pub good_health_percent: u32,
}

pub fn health_distribution(report: &MachineHealthReport) -> HealthDistribution {
    let share = |count: u32| {
        if report.total_machines == 0 {
            0.0
        } else {
            f64::from(count) / f64::from(report.total_machines) * 100.0
        }
    };

    HealthDistribution {
        good: report.good_health,
        fair: report.fair_health,
        critical: report.critical_health,
        good_percent: share(report.good_health),
        fair_percent: share(report.fair_health),
        critical_percent: share(report.critical_health),
        good_health_percent: good_health_percent(
            report.good_health,
            report.fair_health,
            report.critical_health,
        ),
    }
}

/// `round(good / (good + fair + critical) * 100)`, or 100 when nothing is categorised.
pub fn good_health_percent(good: u32, fair: u32, critical: u32) -> u32 {
    let categorised = u64::from(good) + u64::from(fair) + u64::from(critical);
    if categorised == 0 {
        return 100;
    }
    (f64::from(good) / categorised as f64 * 100.0).round() as u32
}

/// Machines most likely to fail first.
pub fn maintenance_priorities(
    report: &FailurePredictionReport,
    limit: Option<usize>,
) -> Vec<&FailurePrediction> {
    let mut rows: Vec<_> = report.predictions.iter().collect();
    rows.sort_by(|a, b| {
        b.failure_probability
            .partial_cmp(&a.failure_probability)
            .unwrap_or(Ordering::Equal)
    });
    if let Some(limit) = limit {
        rows.truncate(limit);
    }
    rows
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ClusterTheme {
    Normal,
    Vibration,
    Temperature,
    Critical,
}

impl ClusterTheme {
    const MATCH_ORDER: [ClusterTheme; 4] = [
        ClusterTheme::Normal,
        ClusterTheme::Vibration,
        ClusterTheme::Temperature,
        ClusterTheme::Critical,
    ];

    fn keyword(&self) -> &'static str {
        match self {
            ClusterTheme::Normal => "normal",
            ClusterTheme::Vibration => "vibration",
            ClusterTheme::Temperature => "temperature",
            ClusterTheme::Critical => "critical",
        }
    }

    /// Picks the first theme whose keyword appears in the cluster name.
    pub fn for_cluster(name: &str) -> Self {
        let name = name.to_lowercase();
        Self::MATCH_ORDER
            .into_iter()
            .find(|theme| name.contains(theme.keyword()))
            .unwrap_or(ClusterTheme::Normal)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClusterSummary {
    pub name: String,
    pub machines: u32,
    pub theme: ClusterTheme,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnomalySummary<'a> {
    pub normal_machines: u32,
    pub anomalous_machines: u32,
    pub clusters: Vec<ClusterSummary>,
    /// Anomalous rows first; otherwise in report order.
    pub rows: Vec<&'a AnomalyResult>,
}

pub fn anomaly_summary(report: &AnomalyReport) -> AnomalySummary<'_> {
    let clusters = report
        .cluster_distribution
        .iter()
        .map(|(name, &machines)| ClusterSummary {
            name: name.clone(),
            machines,
            theme: ClusterTheme::for_cluster(name),
        })
        .collect();

    let mut rows: Vec<_> = report.results.iter().collect();
    rows.sort_by_key(|row| !row.is_anomalous);

    AnomalySummary {
        normal_machines: report
            .total_machines
            .saturating_sub(report.anomalous_machines),
        anomalous_machines: report.anomalous_machines,
        clusters,
        rows,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct YieldOpportunity<'a> {
    pub machine: &'a YieldPrediction,
    /// Percentage points left before 100% efficiency.
    pub potential_gain: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct YieldBreakdown<'a> {
    pub average_efficiency: f64,
    pub excellent: usize,
    pub good: usize,
    pub poor: usize,
    /// Least efficient machines first.
    pub opportunities: Vec<YieldOpportunity<'a>>,
}

pub fn yield_breakdown(report: &YieldReport) -> YieldBreakdown<'_> {
    let level_count = |level: &str| {
        report
            .predictions
            .iter()
            .filter(|p| p.performance_level == level)
            .count()
    };

    let mut opportunities: Vec<_> = report
        .predictions
        .iter()
        .map(|machine| YieldOpportunity {
            machine,
            potential_gain: 100.0 - machine.efficiency_percentage,
        })
        .collect();
    opportunities.sort_by(|a, b| {
        a.machine
            .efficiency_percentage
            .partial_cmp(&b.machine.efficiency_percentage)
            .unwrap_or(Ordering::Equal)
    });

    YieldBreakdown {
        average_efficiency: report.average_efficiency,
        excellent: level_count("Excellent"),
        good: level_count("Good"),
        poor: level_count("Poor"),
        opportunities,
    }
}

/// Whether a cached payload can still be shown as current.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Freshness {
    Missing,
    Fresh,
    /// Older than two polling periods: the last refreshes have not landed.
    Stale,
}

pub fn freshness(
    fetched_at: Option<DateTime<Utc>>,
    poll_interval: Duration,
    now: DateTime<Utc>,
) -> Freshness {
    let Some(fetched_at) = fetched_at else {
        return Freshness::Missing;
    };
    let age = now.signed_duration_since(fetched_at).to_std().unwrap_or_default();
    if age > poll_interval * 2 {
        Freshness::Stale
    } else {
        Freshness::Fresh
    }
}
