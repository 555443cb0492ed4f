// src/daemon.rs

use std::{
    path::PathBuf,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering},
    },
    time::Duration,
};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use thiserror::Error;
use tokio::{
    sync::Mutex,
    task::{JoinError, JoinHandle},
    time::{MissedTickBehavior, interval, timeout},
};
use tokio_util::sync::CancellationToken;
use tracing::{info, trace, warn};

use crate::{
    config::Config,
    flow::Flow,
    flow_file::{FlowFileError, load_flows_from_dir},
    registry::NodeRegistry,
    state::Store,
};

const NO_TIMESTAMP: i64 = i64::MIN;

#[derive(Debug, Clone)]
pub struct DaemonConfig {
    pub heartbeat: Duration,
    /// Upper bound on how long [`FlowDaemon::execute_flow`] waits for a run.
    pub flow_timeout: Duration,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            heartbeat: Duration::from_secs(1),
            flow_timeout: Duration::from_secs(300),
        }
    }
}

impl From<&Config> for DaemonConfig {
    fn from(config: &Config) -> Self {
        Self {
            flow_timeout: config.flow_timeout(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("Flow not found: {0}")]
    FlowNotFound(String),
    #[error("Flow '{name}' did not finish within {timeout:?}")]
    Timeout { name: String, timeout: Duration },
    #[error("flow task failed: {0}")]
    Join(#[from] JoinError),
    #[error("could not load flows: {0}")]
    Load(#[from] FlowFileError),
}

struct Heartbeat {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

/// Process-wide registry of named flows with a background heartbeat.
///
/// Registry operations are synchronous and may be called whether or not
/// the daemon is running.
pub struct FlowDaemon {
    config: DaemonConfig,
    flows: DashMap<String, Arc<Flow>>,
    flow_dir: Option<(PathBuf, NodeRegistry)>,
    running: AtomicBool,
    beats: Arc<AtomicU64>,
    last_beat_ms: Arc<AtomicI64>,
    started_at_ms: AtomicI64,
    heartbeat: Mutex<Option<Heartbeat>>,
}

impl FlowDaemon {
    pub fn new(config: DaemonConfig) -> Self {
        Self {
            config,
            flows: DashMap::new(),
            flow_dir: None,
            running: AtomicBool::new(false),
            beats: Arc::new(AtomicU64::new(0)),
            last_beat_ms: Arc::new(AtomicI64::new(NO_TIMESTAMP)),
            started_at_ms: AtomicI64::new(NO_TIMESTAMP),
            heartbeat: Mutex::new(None),
        }
    }

    /// Flow files in `dir` are loaded through `registry` on every start.
    pub fn with_flow_dir(mut self, dir: impl Into<PathBuf>, registry: NodeRegistry) -> Self {
        self.flow_dir = Some((dir.into(), registry));
        self
    }

    pub fn config(&self) -> &DaemonConfig {
        &self.config
    }

    /// Registers `flow` under `name`, replacing any flow already there.
    pub fn add(&self, name: impl Into<String>, flow: Flow) -> Arc<Flow> {
        let name = name.into();
        let flow = Arc::new(flow);
        self.flows.insert(name.clone(), flow.clone());
        info!("Added flow: {}", name);
        flow
    }

    pub fn remove(&self, name: &str) -> Option<Arc<Flow>> {
        let removed = self.flows.remove(name).map(|(_, flow)| flow);
        if removed.is_some() {
            info!("Removed flow: {}", name);
        }
        removed
    }

    pub fn get(&self, name: &str) -> Option<Arc<Flow>> {
        self.flows.get(name).map(|f| f.clone())
    }

    /// Registered names, sorted.
    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.flows.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn heartbeats(&self) -> u64 {
        self.beats.load(Ordering::SeqCst)
    }

    pub fn last_heartbeat(&self) -> Option<DateTime<Utc>> {
        from_millis(self.last_beat_ms.load(Ordering::SeqCst))
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        from_millis(self.started_at_ms.load(Ordering::SeqCst))
    }

    /// Loads flows and spawns the heartbeat. Starting a running daemon is a no-op.
    pub async fn start(&self) -> Result<(), DaemonError> {
        let mut heartbeat = self.heartbeat.lock().await;
        if heartbeat.is_some() {
            warn!("Daemon already running");
            return Ok(());
        }

        info!("Starting flow daemon");
        self.initialize_flows()?;

        let token = CancellationToken::new();
        let handle = tokio::spawn(heartbeat_loop(
            self.config.heartbeat,
            token.clone(),
            self.beats.clone(),
            self.last_beat_ms.clone(),
        ));
        *heartbeat = Some(Heartbeat { token, handle });

        self.started_at_ms.store(Utc::now().timestamp_millis(), Ordering::SeqCst);
        self.running.store(true, Ordering::SeqCst);
        info!("Flow daemon started with {} flows", self.flows.len());
        Ok(())
    }

    /// Cancels the heartbeat and waits for it to finish. Stopping a stopped
    /// daemon is a no-op.
    pub async fn stop(&self) {
        let Some(Heartbeat { token, handle }) = self.heartbeat.lock().await.take() else {
            return;
        };

        info!("Stopping flow daemon");
        self.running.store(false, Ordering::SeqCst);
        token.cancel();
        if let Err(e) = handle.await {
            warn!("heartbeat task ended abnormally: {}", e);
        }
        info!("Flow daemon stopped");
    }

    /// Runs a registered flow on the blocking pool.
    ///
    /// On timeout the run is abandoned, not cancelled, and finishes in the
    /// background.
    pub async fn execute_flow(
        &self,
        name: &str,
        input: Option<Store>,
    ) -> Result<Store, DaemonError> {
        let flow = self
            .get(name)
            .ok_or_else(|| DaemonError::FlowNotFound(name.to_string()))?;

        let run = tokio::task::spawn_blocking(move || flow.run_default(input));
        match timeout(self.config.flow_timeout, run).await {
            Ok(joined) => Ok(joined?),
            Err(_) => Err(DaemonError::Timeout {
                name: name.to_string(),
                timeout: self.config.flow_timeout,
            }),
        }
    }

    fn initialize_flows(&self) -> Result<(), DaemonError> {
        if let Some((dir, registry)) = &self.flow_dir {
            for flow in load_flows_from_dir(dir, registry)? {
                self.add(flow.name().to_string(), flow);
            }
        }
        Ok(())
    }
}

impl Drop for FlowDaemon {
    fn drop(&mut self) {
        if let Some(heartbeat) = self.heartbeat.get_mut().take() {
            heartbeat.token.cancel();
        }
    }
}

impl std::fmt::Debug for FlowDaemon {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlowDaemon")
            .field("flows", &self.list())
            .field("running", &self.is_running())
            .finish()
    }
}

async fn heartbeat_loop(
    period: Duration,
    token: CancellationToken,
    beats: Arc<AtomicU64>,
    last: Arc<AtomicI64>,
) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // the first tick completes immediately
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = ticker.tick() => {
                let n = beats.fetch_add(1, Ordering::SeqCst) + 1;
                last.store(Utc::now().timestamp_millis(), Ordering::SeqCst);
                trace!("Daemon heartbeat {}", n);
            }
        }
    }
}

fn from_millis(ms: i64) -> Option<DateTime<Utc>> {
    if ms == NO_TIMESTAMP {
        None
    } else {
        DateTime::from_timestamp_millis(ms)
    }
}
