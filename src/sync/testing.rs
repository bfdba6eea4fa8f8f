//! In-memory `FeedSource` for exercising the sync layer without a backend.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::oneshot;

use crate::client::{Endpoint, FeedSource, FetchError};
use crate::models::{
    AnomalyReport, FactoryStatistics, FailurePredictionReport, Feed, FeedPayload,
    MachineHealthReport, MachineSnapshot, YieldReport,
};

type FeedResult = Result<FeedPayload, FetchError>;

#[derive(Default)]
pub(crate) struct ScriptedSource {
    responses: Mutex<HashMap<Feed, FeedResult>>,
    held: Mutex<HashSet<Feed>>,
    pending: Mutex<Vec<Option<oneshot::Sender<FeedResult>>>>,
    fetch_calls: Mutex<HashMap<Feed, usize>>,
    recompute_calls: AtomicUsize,
    recompute_result: Mutex<Option<FetchError>>,
    recompute_gate: Mutex<Option<oneshot::Receiver<()>>>,
}

impl ScriptedSource {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn network_error(feed: Feed) -> FetchError {
        FetchError::Network {
            endpoint: Endpoint::Feed(feed),
            message: "connection refused".to_string(),
        }
    }

    /// Sets the immediate response for `feed`. Unscripted feeds get a default payload.
    pub(crate) fn respond(&self, feed: Feed, result: FeedResult) {
        self.responses.lock().unwrap().insert(feed, result);
    }

    /// Makes every later fetch of `feed` wait until released by index.
    pub(crate) fn hold(&self, feed: Feed) {
        self.held.lock().unwrap().insert(feed);
    }

    /// Completes the `index`-th held request (in call order).
    pub(crate) fn release(&self, index: usize, result: FeedResult) {
        let sender = self.pending.lock().unwrap()[index]
            .take()
            .expect("held request already released");
        let _ = sender.send(result);
    }

    pub(crate) async fn wait_for_pending(&self, count: usize) {
        while self.pending.lock().unwrap().len() < count {
            tokio::task::yield_now().await;
        }
    }

    pub(crate) fn fetch_calls(&self, feed: Feed) -> usize {
        self.fetch_calls
            .lock()
            .unwrap()
            .get(&feed)
            .copied()
            .unwrap_or(0)
    }

    pub(crate) fn recompute_calls(&self) -> usize {
        self.recompute_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn fail_recompute(&self, error: FetchError) {
        *self.recompute_result.lock().unwrap() = Some(error);
    }

    /// Holds the next recompute call open until the returned sender fires.
    pub(crate) fn hold_recompute(&self) -> oneshot::Sender<()> {
        let (tx, rx) = oneshot::channel();
        *self.recompute_gate.lock().unwrap() = Some(rx);
        tx
    }
}

#[async_trait]
impl FeedSource for ScriptedSource {
    async fn fetch_feed(&self, feed: Feed) -> Result<FeedPayload, FetchError> {
        *self.fetch_calls.lock().unwrap().entry(feed).or_default() += 1;

        let held = self.held.lock().unwrap().contains(&feed);
        if held {
            let (tx, rx) = oneshot::channel();
            self.pending.lock().unwrap().push(Some(tx));
            return rx.await.unwrap_or_else(|_| Err(Self::network_error(feed)));
        }

        let scripted = self.responses.lock().unwrap().get(&feed).cloned();
        scripted.unwrap_or_else(|| Ok(default_payload(feed)))
    }

    async fn request_recompute(&self) -> Result<(), FetchError> {
        self.recompute_calls.fetch_add(1, Ordering::SeqCst);
        let gate = self.recompute_gate.lock().unwrap().take();
        if let Some(gate) = gate {
            let _ = gate.await;
        }
        match self.recompute_result.lock().unwrap().clone() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

pub(crate) fn machine(id: &str, health_score: f64, failure_probability: f64) -> MachineSnapshot {
    MachineSnapshot {
        machine_id: id.to_string(),
        health_score,
        failure_probability,
        health_status: if health_score >= 75.0 {
            "Good".to_string()
        } else if health_score >= 50.0 {
            "Fair".to_string()
        } else {
            "Critical".to_string()
        },
        yield_efficiency: 90.0,
        cluster: 0,
        is_anomalous: false,
        temperature: 72.0,
        vibration: 0.42,
        pressure: 101.3,
        speed: 1480.0,
        runtime_hours: 950.0,
        last_update: None,
    }
}

pub(crate) fn health_report(rows: &[(&str, f64, f64)]) -> MachineHealthReport {
    let machines: Vec<_> = rows
        .iter()
        .map(|&(id, health, probability)| machine(id, health, probability))
        .collect();
    let count = |status: &str| machines.iter().filter(|m| m.health_status == status).count() as u32;
    MachineHealthReport {
        timestamp: None,
        total_machines: machines.len() as u32,
        average_health_score: 0.0,
        good_health: count("Good"),
        fair_health: count("Fair"),
        critical_health: count("Critical"),
        machines,
    }
}

pub(crate) fn health_payload(rows: &[(&str, f64, f64)]) -> FeedPayload {
    FeedPayload::MachineHealth(health_report(rows))
}

pub(crate) fn stats_payload(total_machines: u32) -> FeedPayload {
    FeedPayload::Statistics(FactoryStatistics {
        total_machines,
        total_samples: 0,
        total_failures: 0,
        failure_rate_percentage: 0.0,
        date_range: None,
        average_metrics: None,
    })
}

pub(crate) fn yield_payload(average_efficiency: f64) -> FeedPayload {
    FeedPayload::Yield(YieldReport {
        timestamp: None,
        total_machines: 0,
        average_efficiency,
        predictions: Vec::new(),
    })
}

pub(crate) fn default_payload(feed: Feed) -> FeedPayload {
    match feed {
        Feed::Overview => FeedPayload::Overview(health_report(&[("M1", 92.0, 0.05)])),
        Feed::MachineHealth => health_payload(&[("M1", 92.0, 0.05)]),
        Feed::Maintenance => FeedPayload::Maintenance(FailurePredictionReport {
            timestamp: None,
            total_machines: 0,
            high_risk: 0,
            medium_risk: 0,
            low_risk: 0,
            predictions: Vec::new(),
        }),
        Feed::Anomaly => FeedPayload::Anomaly(AnomalyReport {
            timestamp: None,
            total_machines: 0,
            anomalous_machines: 0,
            cluster_distribution: BTreeMap::new(),
            results: Vec::new(),
        }),
        Feed::Yield => yield_payload(85.0),
        Feed::Statistics => stats_payload(1),
    }
}
