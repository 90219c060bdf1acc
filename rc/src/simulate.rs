//! Scenario-driven simulation of runs hitting deadlines and quotas
//!
//! A scenario lists runs with their timeouts, how long ago they started, when
//! they finish on their own and how many quota rejections they hit first. The
//! simulator plays the reconciler's role against a [`RunTimers`].

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::path::Path;
use std::time::Duration;

use chrono::{TimeDelta, Utc};
use eyre::{Context, Result, eyre};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::domain::{RunIdentity, RunKey};
use crate::timers::RunTimers;

/// A set of runs to simulate
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Scenario {
    #[serde(default)]
    pub runs: Vec<ScenarioRun>,
}

/// One run in a scenario
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioRun {
    /// Run key, e.g. `taskrun/default/build`
    pub key: String,

    /// Timeout in seconds; the configured default applies when absent
    #[serde(rename = "timeout-secs", default)]
    pub timeout_secs: Option<u64>,

    /// How long before the simulation the run started; absent means never
    #[serde(rename = "started-secs-ago", default)]
    pub started_secs_ago: Option<u64>,

    /// Seconds after starting at which the run completes on its own
    #[serde(rename = "finish-after-secs", default)]
    pub finish_after_secs: Option<u64>,

    /// Quota rejections to go through before the run can start
    #[serde(rename = "quota-rejections", default)]
    pub quota_rejections: u32,
}

impl Scenario {
    /// Load a scenario from a YAML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path)
            .context(format!("Failed to read scenario {}", path.as_ref().display()))?;
        let scenario: Self = serde_yaml::from_str(&content).context("Failed to parse scenario")?;
        scenario.validate()?;
        Ok(scenario)
    }

    /// Reject scenarios with empty or duplicate keys
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for run in &self.runs {
            if run.key.is_empty() {
                return Err(eyre!("Scenario run with empty key"));
            }
            if !seen.insert(run.key.as_str()) {
                return Err(eyre!("Duplicate run key in scenario: {}", run.key));
            }
        }
        Ok(())
    }
}

/// How a simulated run ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum RunOutcome {
    /// Completed before its deadline
    Finished,
    /// Deadline callback fired
    TimedOut,
    /// Could not be watched
    Rejected(String),
    /// Still pending when the simulation was stopped
    Abandoned,
}

impl std::fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunOutcome::Finished => write!(f, "finished"),
            RunOutcome::TimedOut => write!(f, "timed out"),
            RunOutcome::Rejected(reason) => write!(f, "rejected: {}", reason),
            RunOutcome::Abandoned => write!(f, "abandoned"),
        }
    }
}

/// Final state of every run in a scenario
#[derive(Debug, Clone, Default, Serialize)]
pub struct SimulationReport {
    /// Outcome per run key
    pub outcomes: BTreeMap<String, RunOutcome>,
    /// Quota retries each run went through
    pub retries: BTreeMap<String, u32>,
}

impl SimulationReport {
    pub fn count(&self, outcome: &RunOutcome) -> usize {
        self.outcomes.values().filter(|o| *o == outcome).count()
    }
}

#[derive(Debug)]
enum Event {
    Deadline(RunKey),
    Retry(RunKey),
    Finished(RunKey),
}

struct Simulation<'a> {
    timers: RunTimers<RunKey>,
    runs: HashMap<String, &'a ScenarioRun>,
    rejections_left: HashMap<String, u32>,
    events: mpsc::UnboundedSender<Event>,
    stop: CancellationToken,
    report: SimulationReport,
}

impl Simulation<'_> {
    fn start_run(&mut self, run: &RunKey, start_time: Option<chrono::DateTime<Utc>>) {
        let key = run.run_key();
        let Some(planned) = self.runs.get(&key).copied() else {
            warn!(%key, "Simulation::start_run: unknown run");
            return;
        };

        let timeout = planned.timeout_secs.map(Duration::from_secs);
        if let Err(e) = self.timers.deadlines().watch_with_default(run, timeout, start_time) {
            self.record(&key, RunOutcome::Rejected(e.to_string()));
            return;
        }

        if let Some(finish_after) = planned.finish_after_secs {
            let events = self.events.clone();
            let stop = self.stop.clone();
            let run = run.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = stop.cancelled() => {}
                    _ = tokio::time::sleep(Duration::from_secs(finish_after)) => {
                        let _ = events.send(Event::Finished(run));
                    }
                }
            });
        }
    }

    fn record(&mut self, key: &str, outcome: RunOutcome) {
        if self.report.outcomes.contains_key(key) {
            debug!(%key, ?outcome, "Simulation::record: already resolved, ignoring");
            return;
        }
        info!(%key, %outcome, "Run resolved");
        self.report.outcomes.insert(key.to_string(), outcome);
    }

    fn handle(&mut self, event: Event) {
        match event {
            Event::Deadline(run) => {
                let key = run.run_key();
                self.timers.finish(&run);
                self.record(&key, RunOutcome::TimedOut);
            }
            Event::Finished(run) => {
                let key = run.run_key();
                self.timers.finish(&run);
                self.record(&key, RunOutcome::Finished);
            }
            Event::Retry(run) => {
                let key = run.run_key();
                let left = self.rejections_left.get(&key).copied().unwrap_or(0);
                if left > 0 {
                    self.rejections_left.insert(key.clone(), left - 1);
                    let retry = self.timers.retries().schedule_retry(&run);
                    info!(%key, attempt = retry.attempt, delay = ?retry.delay, "Quota still exceeded");
                    self.report.retries.insert(key, retry.attempt);
                } else {
                    self.rejections_left.remove(&key);
                    info!(%key, "Quota available, starting run");
                    self.start_run(&run, Some(Utc::now()));
                }
            }
        }
    }
}

/// Play `scenario` until every run is resolved or `shutdown` is cancelled
pub async fn simulate(scenario: &Scenario, config: &Config, shutdown: CancellationToken) -> Result<SimulationReport> {
    scenario.validate()?;

    // Stopping the simulation must not cancel the caller's token
    let stop = shutdown.child_token();
    let timers: RunTimers<RunKey> = RunTimers::new(config, stop.clone());
    let (tx, mut rx) = mpsc::unbounded_channel();

    let deadline_tx = tx.clone();
    timers.deadlines().set_deadline_callback(move |run| {
        let _ = deadline_tx.send(Event::Deadline(run));
    });
    let retry_tx = tx.clone();
    timers.retries().set_retry_callback(move |run| {
        let _ = retry_tx.send(Event::Retry(run));
    });

    let mut sim = Simulation {
        timers,
        runs: scenario.runs.iter().map(|r| (r.key.clone(), r)).collect(),
        rejections_left: HashMap::new(),
        events: tx,
        stop: stop.clone(),
        report: SimulationReport::default(),
    };

    let now = Utc::now();
    for planned in &scenario.runs {
        let run = RunKey::from(planned.key.as_str());
        if planned.quota_rejections > 0 {
            sim.rejections_left.insert(planned.key.clone(), planned.quota_rejections - 1);
            let retry = sim.timers.retries().schedule_retry(&run);
            info!(key = %planned.key, attempt = retry.attempt, delay = ?retry.delay, "Quota exceeded");
            sim.report.retries.insert(planned.key.clone(), retry.attempt);
        } else {
            let start_time = planned
                .started_secs_ago
                .and_then(|ago| i64::try_from(ago).ok())
                .map(|ago| now - TimeDelta::seconds(ago));
            sim.start_run(&run, start_time);
        }
    }

    while sim.report.outcomes.len() < scenario.runs.len() {
        tokio::select! {
            _ = shutdown.cancelled() => {
                warn!("Simulation interrupted");
                break;
            }
            event = rx.recv() => match event {
                Some(event) => sim.handle(event),
                None => break,
            },
        }
    }

    stop.cancel();
    for planned in &scenario.runs {
        if !sim.report.outcomes.contains_key(&planned.key) {
            sim.record(&planned.key, RunOutcome::Abandoned);
        }
    }
    Ok(sim.report)
}
