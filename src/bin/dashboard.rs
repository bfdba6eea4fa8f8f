use clap::Parser;
use factory_dashboard::client::HttpFetcher;
use factory_dashboard::notifications::{NotificationFeedState, Severity};
use factory_dashboard::summary::{
    anomaly_summary, health_distribution, maintenance_priorities, yield_breakdown,
};
use factory_dashboard::sync::RefreshState;
use factory_dashboard::version::VERSION;
use factory_dashboard::{DashboardConfig, DashboardSession, DashboardSnapshot, Feed, FeedPayload};
use std::sync::Arc;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{error, info, warn};
use tracing_appender::rolling;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file
    #[arg(short, long)]
    config: Option<String>,

    /// Fetch every feed once, print the snapshot as JSON and exit
    #[arg(long)]
    once: bool,

    /// Trigger a manual refresh right after start-up
    #[arg(long)]
    refresh: bool,
}

fn init_logging(log_dir: &str) {
    // JSON file log, rotated daily
    let file_appender = rolling::daily(log_dir, "dashboard.log");
    let file_layer = fmt::layer()
        .with_writer(file_appender)
        .with_ansi(false)
        .json();

    let stdout_layer = fmt::layer().with_writer(std::io::stdout);

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(stdout_layer)
        .init();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Plain version output without going through clap.
    if std::env::args().any(|arg| arg == "--version") {
        println!("Dashboard version: {VERSION}");
        return Ok(());
    }

    let args = Args::parse();

    let config = match DashboardConfig::load(args.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load dashboard configuration: {e}");
            return Err(e.into());
        }
    };

    init_logging(&config.log_dir);
    info!("Starting dashboard, version: {}", VERSION);

    if args.once {
        return print_once(&config).await;
    }

    let session = DashboardSession::start(&config)?;
    if args.refresh && !session.request_refresh() {
        info!("Refresh already running at start-up.");
    }

    let mut notifications = session.subscribe_notifications();
    let mut refresh_state = session.refresh_state();
    let mut status_interval = interval(config.status_report_interval());
    status_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // Skip the immediate tick; nothing has landed yet.
    status_interval.tick().await;

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            biased;

            result = &mut ctrl_c => {
                if let Err(e) = result {
                    error!(error = %e, "Failed to listen for shutdown signal.");
                }
                info!("Shutdown signal received.");
                break;
            }
            changed = notifications.changed() => {
                if changed.is_err() {
                    warn!("Notification store dropped; stopping.");
                    break;
                }
                let state = notifications.borrow_and_update().clone();
                report_notifications(&state);
            }
            changed = refresh_state.changed() => {
                if changed.is_err() {
                    warn!("Refresh coordinator dropped; stopping.");
                    break;
                }
                let state = *refresh_state.borrow_and_update();
                if let RefreshState::Refreshing { cycle } = state {
                    info!(
                        cycle = %cycle.id,
                        started_at = %cycle.started_at,
                        "Dashboard is refreshing."
                    );
                }
            }
            _ = status_interval.tick() => {
                report_status(&session.snapshot());
            }
        }
    }

    session.shutdown().await;
    info!("Dashboard stopped.");
    Ok(())
}

async fn print_once(
    config: &DashboardConfig,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let source = HttpFetcher::new(config.api_url.clone(), config.request_timeout())?;
    let session = DashboardSession::connect(config, Arc::new(source));

    let outcomes = session.sync_now().await;
    let applied = outcomes.iter().filter(|(_, o)| o.is_applied()).count();
    info!(applied, total = outcomes.len(), "Single pass finished.");

    let snapshot = session.snapshot();
    println!("{}", serde_json::to_string_pretty(&snapshot)?);
    session.shutdown().await;
    Ok(())
}

fn report_notifications(state: &NotificationFeedState) {
    let counts = state.severity_counts();
    info!(
        count = state.count,
        critical = counts.critical,
        warning = counts.warning,
        info = counts.info,
        "Notification feed updated."
    );
    for record in state.by_severity() {
        if record.severity == Severity::Critical {
            warn!(machine_id = %record.machine_id, title = %record.title, "{}", record.message);
        }
    }
}

fn report_status(snapshot: &DashboardSnapshot) {
    for view in &snapshot.feeds {
        info!(
            feed = %view.feed,
            freshness = ?view.freshness,
            sequence = view.sequence,
            consecutive_failures = view.status.consecutive_failures,
            last_error = ?view.status.last_error.as_ref().map(|e| e.to_string()),
            "Feed status."
        );
    }

    if let Some(FeedPayload::Overview(report)) = snapshot.payload(Feed::Overview) {
        let distribution = health_distribution(report);
        info!(
            total_machines = report.total_machines,
            average_health_score = report.average_health_score,
            good_health_percent = distribution.good_health_percent,
            "Fleet health."
        );
    }
    if let Some(FeedPayload::Maintenance(report)) = snapshot.payload(Feed::Maintenance) {
        for prediction in maintenance_priorities(report, Some(3)) {
            info!(
                machine_id = %prediction.machine_id,
                failure_probability = prediction.failure_probability,
                risk_level = ?prediction.risk_level,
                "Maintenance priority."
            );
        }
    }
    if let Some(FeedPayload::Anomaly(report)) = snapshot.payload(Feed::Anomaly) {
        let summary = anomaly_summary(report);
        for cluster in &summary.clusters {
            info!(
                cluster = %cluster.name,
                machines = cluster.machines,
                theme = ?cluster.theme,
                "Cluster."
            );
        }
        info!(
            normal = summary.normal_machines,
            anomalous = summary.anomalous_machines,
            "Anomaly overview."
        );
    }
    if let Some(FeedPayload::Yield(report)) = snapshot.payload(Feed::Yield) {
        let breakdown = yield_breakdown(report);
        info!(
            average_efficiency = breakdown.average_efficiency,
            excellent = breakdown.excellent,
            good = breakdown.good,
            poor = breakdown.poor,
            "Yield overview."
        );
    }
}
