//! Playback session actor.
//!
//! Owns the engine for one stream. Bring-up, classified recovery and the
//! live-edge sampler all run as named tasks that report back through the
//! mailbox, tagged with the bring-up generation and, for recovery timers, a
//! sequence number. Results from a superseded bring-up or recovery step are
//! dropped.

use super::engine::{EngineError, EngineEvent, EngineGuard, MediaEngine, PlaybackBackend};
use super::state::{PhaseTimestamps, PlaybackState, RecoveryBudget, RecoveryStep};
use super::tunables::EngineTunables;
use crate::config::PlaybackConfig;
use crate::error::{LiveError, LiveResult, MediaErrorClass};
use crate::metrics::{MetricRecord, MetricsSink};
use crate::monitor::ConnectionMonitor;
use crate::scheduler::Scheduler;
use reqwest::Url;
use resilience::{with_timeout, RetryExecutor, RetryPolicy};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

const PRELOAD: &str = "manifest-preload";
const LOAD: &str = "load";
const EVENTS: &str = "engine-events";
const RECOVERY: &str = "recovery";
const REBUILD: &str = "rebuild";
const LIVE_EDGE: &str = "live-edge";

/// Observable playback status
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackSnapshot {
    pub source_url: Option<String>,
    pub state: PlaybackState,
    /// User-facing error for the current degradation or failure
    pub current_error: Option<LiveError>,
    pub recovery_attempts: u32,
    /// Seconds behind the live edge, sampled while playing
    pub live_edge_offset_secs: Option<f64>,
    pub join_time: Option<Duration>,
}

impl Default for PlaybackSnapshot {
    fn default() -> Self {
        Self {
            source_url: None,
            state: PlaybackState::Idle,
            current_error: None,
            recovery_attempts: 0,
            live_edge_offset_secs: None,
            join_time: None,
        }
    }
}

enum Command {
    SetSource(String),
    Retry,
    JumpToLive,
    Shutdown,
    Engine { generation: u64, event: EngineEvent },
    ManifestPreloaded { generation: u64, loaded: bool },
    BringUpFinished { generation: u64, result: LiveResult<()> },
    NetworkReachable { generation: u64, sequence: u64 },
    RecoveryTimedOut { generation: u64, sequence: u64 },
    RebuildDue { generation: u64 },
    SampleLiveEdge { generation: u64 },
}

pub struct PlaybackSession {
    stream_id: String,
    commands: mpsc::UnboundedSender<Command>,
    status: watch::Receiver<PlaybackSnapshot>,
    task: JoinHandle<()>,
}

impl PlaybackSession {
    pub fn spawn(
        stream_id: impl Into<String>,
        config: PlaybackConfig,
        backend: Arc<dyn PlaybackBackend>,
        monitor: Arc<ConnectionMonitor>,
        metrics: MetricsSink,
    ) -> Self {
        let stream_id = stream_id.into();
        let (status_tx, status) = watch::channel(PlaybackSnapshot::default());
        let (commands, mailbox) = mpsc::unbounded_channel();

        let load_policy = RetryPolicy::from_config(&config.load_retry)
            .retry_if(LiveError::is_retryable);

        let actor = Actor {
            stream_id: stream_id.clone(),
            budget: RecoveryBudget::new(config.max_network_recoveries, config.max_media_recoveries),
            config,
            load_policy,
            backend,
            monitor,
            metrics,
            scheduler: Scheduler::new("playback"),
            mailbox: commands.clone(),
            status: status_tx,
            snapshot: PlaybackSnapshot::default(),
            engine: None,
            generation: 0,
            sequence: 0,
            phases: None,
            join_reported: false,
        };
        let task = tokio::spawn(actor.run(mailbox));

        Self {
            stream_id,
            commands,
            status,
            task,
        }
    }

    fn post(&self, command: Command) {
        if self.commands.send(command).is_err() {
            debug!(stream_id = %self.stream_id, "Playback session already stopped");
        }
    }

    /// Tear down whatever is playing and bring up `url`.
    pub fn set_source(&self, url: impl Into<String>) {
        self.post(Command::SetSource(url.into()));
    }

    /// Start over after a fatal error. Ignored in any other state.
    pub fn retry(&self) {
        self.post(Command::Retry);
    }

    pub fn jump_to_live(&self) {
        self.post(Command::JumpToLive);
    }

    pub fn snapshot(&self) -> PlaybackSnapshot {
        self.status.borrow().clone()
    }

    pub fn state(&self) -> PlaybackState {
        self.status.borrow().state
    }

    pub fn watch(&self) -> watch::Receiver<PlaybackSnapshot> {
        self.status.clone()
    }

    /// Release the engine and cancel every timer.
    pub async fn shutdown(&mut self) {
        if self.task.is_finished() {
            return;
        }
        self.post(Command::Shutdown);
        if let Err(e) = (&mut self.task).await {
            if !e.is_cancelled() {
                warn!(stream_id = %self.stream_id, "Playback task failed: {}", e);
            }
        }
    }
}

impl Drop for PlaybackSession {
    fn drop(&mut self) {
        self.task.abort();
    }
}

fn origin_of(url: &str) -> Option<String> {
    let origin = Url::parse(url).ok()?.origin();
    origin.is_tuple().then(|| origin.ascii_serialization())
}

fn class_of(error: &LiveError) -> MediaErrorClass {
    match error {
        LiveError::Transport(_) | LiveError::Timeout(_) | LiveError::Http { .. } => {
            MediaErrorClass::Network
        }
        LiveError::MediaPlayback { class, .. } => *class,
        _ => MediaErrorClass::Other,
    }
}

struct Actor {
    stream_id: String,
    config: PlaybackConfig,
    load_policy: RetryPolicy<LiveError>,
    backend: Arc<dyn PlaybackBackend>,
    monitor: Arc<ConnectionMonitor>,
    metrics: MetricsSink,
    scheduler: Scheduler,
    mailbox: mpsc::UnboundedSender<Command>,
    status: watch::Sender<PlaybackSnapshot>,
    snapshot: PlaybackSnapshot,
    engine: Option<EngineGuard>,
    budget: RecoveryBudget,
    generation: u64,
    sequence: u64,
    phases: Option<PhaseTimestamps>,
    join_reported: bool,
}

impl Actor {
    async fn run(mut self, mut mailbox: mpsc::UnboundedReceiver<Command>) {
        while let Some(command) = mailbox.recv().await {
            if !self.handle(command) {
                break;
            }
            self.publish();
        }

        self.scheduler.dispose();
        self.engine = None;
        self.snapshot.state = PlaybackState::Idle;
        self.snapshot.live_edge_offset_secs = None;
        self.publish();
        debug!(stream_id = %self.stream_id, "Playback session disposed");
    }

    fn publish(&self) {
        self.status.send_if_modified(|current| {
            if *current == self.snapshot {
                return false;
            }
            *current = self.snapshot.clone();
            true
        });
    }

    fn handle(&mut self, command: Command) -> bool {
        match command {
            Command::SetSource(url) => {
                self.snapshot.source_url = Some(url);
                self.fresh_budget();
                self.bring_up();
            }
            Command::Retry => match self.snapshot.state {
                PlaybackState::Fatal(_) => {
                    info!(stream_id = %self.stream_id, "Retrying playback");
                    self.fresh_budget();
                    self.bring_up();
                }
                state => debug!(stream_id = %self.stream_id, ?state, "Retry ignored"),
            },
            Command::JumpToLive => self.jump_to_live(),
            Command::Shutdown => return false,
            Command::Engine { generation, event } if generation == self.generation => {
                self.on_engine_event(event)
            }
            Command::ManifestPreloaded { generation, loaded } if generation == self.generation => {
                if loaded {
                    if let Some(phases) = self.phases.as_mut() {
                        phases.manifest = Some(Instant::now());
                    }
                }
            }
            Command::BringUpFinished { generation, result } if generation == self.generation => {
                if let Err(e) = result {
                    warn!(stream_id = %self.stream_id, error = %e, "Source load failed");
                    let class = class_of(&e);
                    self.report(class, &e.to_string());
                    self.fail(class, e.to_string());
                }
            }
            Command::NetworkReachable { generation, sequence }
                if generation == self.generation && sequence == self.sequence =>
            {
                self.resume_loading();
            }
            Command::RecoveryTimedOut { generation, sequence }
                if generation == self.generation && sequence == self.sequence =>
            {
                if let Some(class) = self.snapshot.state.recovering_class() {
                    warn!(stream_id = %self.stream_id, class = %class, "Recovery attempt timed out");
                    self.recover(class);
                }
            }
            Command::RebuildDue { generation } if generation == self.generation => {
                info!(stream_id = %self.stream_id, "Rebuilding playback engine");
                self.bring_up();
            }
            Command::SampleLiveEdge { generation } if generation == self.generation => {
                self.sample_live_edge();
            }
            _ => debug!(stream_id = %self.stream_id, "Discarding superseded playback result"),
        }
        true
    }

    fn fresh_budget(&mut self) {
        self.budget = RecoveryBudget::new(
            self.config.max_network_recoveries,
            self.config.max_media_recoveries,
        );
    }

    fn set_state(&mut self, state: PlaybackState) {
        if self.snapshot.state != state {
            debug!(stream_id = %self.stream_id, from = ?self.snapshot.state, to = ?state, "Playback state changed");
            self.snapshot.state = state;
        }
    }

    fn engine(&self) -> Option<Arc<dyn MediaEngine>> {
        self.engine.as_ref().map(|guard| guard.engine().clone())
    }

    /// Cancel every per-engine task and destroy the engine.
    fn release_engine(&mut self) {
        for task in [PRELOAD, LOAD, EVENTS, RECOVERY, REBUILD, LIVE_EDGE] {
            self.scheduler.cancel(task);
        }
        self.engine = None;
        self.snapshot.live_edge_offset_secs = None;
    }

    fn bring_up(&mut self) {
        self.release_engine();
        self.generation += 1;
        self.join_reported = false;
        self.snapshot.join_time = None;
        self.snapshot.current_error = None;
        self.snapshot.recovery_attempts = self.budget.attempts();

        let Some(url) = self.snapshot.source_url.clone() else {
            self.set_state(PlaybackState::Idle);
            return;
        };
        let generation = self.generation;
        let mut phases = PhaseTimestamps::start(Instant::now());
        self.set_state(PlaybackState::BringingUp);
        info!(stream_id = %self.stream_id, url = %url, generation, "Playback bring-up");

        if let Some(origin) = origin_of(&url) {
            self.backend.preconnect(&origin);
            phases.preconnect = Some(Instant::now());
        }

        // Soft: a slow or failed preload never holds up the engine
        let backend = self.backend.clone();
        let preload_url = url.clone();
        let preload_timeout = self.config.manifest_preload_timeout;
        let mailbox = self.mailbox.clone();
        self.scheduler.spawn(PRELOAD, async move {
            let loaded = matches!(
                with_timeout(preload_timeout, backend.preload_manifest(&preload_url)).await,
                Ok(Ok(()))
            );
            let _ = mailbox.send(Command::ManifestPreloaded { generation, loaded });
        });

        let tunables = EngineTunables::for_profile(&self.backend.network_profile());
        debug!(stream_id = %self.stream_id, tier = ?tunables.tier, "Engine tunables selected");
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let engine = match self.backend.create_engine(&tunables, events_tx) {
            Ok(engine) => engine,
            Err(e) => {
                warn!(stream_id = %self.stream_id, error = %e, "Engine construction failed");
                self.report(MediaErrorClass::Other, &e.to_string());
                self.fail(MediaErrorClass::Other, e.to_string());
                return;
            }
        };
        phases.engine_init = Some(Instant::now());
        self.phases = Some(phases);
        self.engine = Some(EngineGuard::new(engine.clone()));

        let mailbox = self.mailbox.clone();
        self.scheduler.spawn(EVENTS, async move {
            while let Some(event) = events_rx.recv().await {
                if mailbox.send(Command::Engine { generation, event }).is_err() {
                    return;
                }
            }
        });

        let policy = self.load_policy.clone();
        let mailbox = self.mailbox.clone();
        self.scheduler.spawn(LOAD, async move {
            let result: LiveResult<()> = async {
                RetryExecutor::new(policy)
                    .execute(|| engine.load_source(&url))
                    .await?;
                engine.attach_media()
            }
            .await;
            let _ = mailbox.send(Command::BringUpFinished { generation, result });
        });
    }

    fn on_engine_event(&mut self, event: EngineEvent) {
        match event {
            EngineEvent::FirstFrame => self.on_first_frame(),
            EngineEvent::DataResumed => {
                if self.snapshot.state.is_recovering() {
                    info!(stream_id = %self.stream_id, "Playback recovered");
                    self.back_to_playing();
                }
            }
            EngineEvent::Error(error) if !error.fatal => {
                debug!(stream_id = %self.stream_id, kind = ?error.kind, details = %error.details, "Non-fatal engine error");
            }
            EngineEvent::Error(error) => self.on_fatal_error(error),
        }
    }

    fn on_first_frame(&mut self) {
        if !self.join_reported {
            if let Some(phases) = self.phases.as_mut() {
                phases.first_frame = Some(Instant::now());
                if let Some(join_time) = phases.join_time() {
                    info!(
                        stream_id = %self.stream_id,
                        join_time_ms = join_time.as_millis() as u64,
                        "First frame"
                    );
                    self.metrics.record(MetricRecord::join_time(
                        &self.stream_id,
                        join_time,
                        phases.durations(),
                    ));
                    self.snapshot.join_time = Some(join_time);
                    self.join_reported = true;
                }
            }
        }

        if matches!(
            self.snapshot.state,
            PlaybackState::BringingUp | PlaybackState::Recovering(_) | PlaybackState::Degraded(_)
        ) {
            self.back_to_playing();
            self.start_live_edge_sampler();
        }
    }

    /// Close the current error episode.
    fn back_to_playing(&mut self) {
        self.sequence += 1;
        self.scheduler.cancel(RECOVERY);
        self.budget.recovered();
        self.snapshot.recovery_attempts = 0;
        self.snapshot.current_error = None;
        self.set_state(PlaybackState::Playing);
    }

    fn on_fatal_error(&mut self, error: EngineError) {
        if matches!(self.snapshot.state, PlaybackState::Fatal(_) | PlaybackState::Idle) {
            return;
        }
        let class = error.class();
        warn!(
            stream_id = %self.stream_id,
            class = %class,
            details = %error.details,
            "Fatal engine error"
        );
        self.report(class, &error.details);
        self.snapshot.current_error = Some(LiveError::MediaPlayback {
            class,
            message: error.details,
        });
        self.recover(class);
    }

    fn report(&self, class: MediaErrorClass, message: &str) {
        self.metrics.record(MetricRecord::playback_error(
            &self.stream_id,
            class,
            message,
            self.budget.attempts(),
        ));
    }

    fn recover(&mut self, class: MediaErrorClass) {
        self.sequence += 1;
        self.scheduler.cancel(RECOVERY);
        let sequence = self.sequence;
        let generation = self.generation;

        let step = self.budget.next_step(class);
        self.snapshot.recovery_attempts = self.budget.attempts();
        match step {
            RecoveryStep::ResumeNetwork { attempt } => {
                info!(stream_id = %self.stream_id, attempt, "Network recovery: waiting for reachability");
                self.set_state(PlaybackState::Degraded(class));
                let monitor = self.monitor.clone();
                let wait = self.config.network_recovery_wait;
                let mailbox = self.mailbox.clone();
                self.scheduler.spawn(RECOVERY, async move {
                    let command = if monitor.wait_for_connection(wait).await {
                        Command::NetworkReachable { generation, sequence }
                    } else {
                        Command::RecoveryTimedOut { generation, sequence }
                    };
                    let _ = mailbox.send(command);
                });
            }
            RecoveryStep::RecoverMedia { attempt } => {
                info!(stream_id = %self.stream_id, attempt, "Media recovery");
                self.set_state(PlaybackState::Recovering(class));
                if let Some(engine) = self.engine() {
                    engine.recover_media_error();
                }
                self.schedule_recovery_timeout(self.config.media_recovery_wait);
            }
            RecoveryStep::Rebuild => {
                info!(stream_id = %self.stream_id, "Media recovery exhausted, scheduling rebuild");
                self.set_state(PlaybackState::Recovering(class));
                let mailbox = self.mailbox.clone();
                self.scheduler.schedule(REBUILD, self.config.rebuild_delay, async move {
                    let _ = mailbox.send(Command::RebuildDue { generation });
                });
            }
            RecoveryStep::GiveUp(class) => {
                let message = match class {
                    MediaErrorClass::Network => {
                        "connection lost: unable to resume the stream".to_string()
                    }
                    _ => match &self.snapshot.current_error {
                        Some(LiveError::MediaPlayback { message, .. }) => message.clone(),
                        _ => format!("unrecoverable {class} error"),
                    },
                };
                self.fail(class, message);
            }
        }
    }

    fn resume_loading(&mut self) {
        let Some(class) = self.snapshot.state.recovering_class() else {
            return;
        };
        debug!(stream_id = %self.stream_id, "Reachable, resuming load");
        if let Some(engine) = self.engine() {
            engine.start_load();
        }
        self.set_state(PlaybackState::Recovering(class));
        self.schedule_recovery_timeout(self.config.network_recovery_wait);
    }

    fn schedule_recovery_timeout(&mut self, wait: Duration) {
        let generation = self.generation;
        let sequence = self.sequence;
        let mailbox = self.mailbox.clone();
        self.scheduler.schedule(RECOVERY, wait, async move {
            let _ = mailbox.send(Command::RecoveryTimedOut { generation, sequence });
        });
    }

    fn fail(&mut self, class: MediaErrorClass, message: String) {
        warn!(stream_id = %self.stream_id, class = %class, message = %message, "Playback failed");
        self.release_engine();
        self.sequence += 1;
        self.snapshot.current_error = Some(LiveError::MediaPlayback { class, message });
        self.set_state(PlaybackState::Fatal(class));
    }

    fn start_live_edge_sampler(&mut self) {
        let generation = self.generation;
        let every = self.config.live_edge_sample_interval.max(Duration::from_millis(100));
        let mailbox = self.mailbox.clone();
        self.scheduler.spawn(LIVE_EDGE, async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if mailbox.send(Command::SampleLiveEdge { generation }).is_err() {
                    return;
                }
            }
        });
    }

    fn sample_live_edge(&mut self) {
        let Some(engine) = self.engine() else {
            return;
        };
        self.snapshot.live_edge_offset_secs = engine
            .seekable_range()
            .map(|range| (range.end - engine.current_time()).max(0.0));
    }

    fn jump_to_live(&mut self) {
        let Some(engine) = self.engine() else {
            debug!(stream_id = %self.stream_id, "No engine, cannot jump to live");
            return;
        };
        let Some(range) = engine.seekable_range() else {
            return;
        };
        let target = (range.end - self.config.live_edge_margin_secs).max(range.start);
        debug!(stream_id = %self.stream_id, target, "Jumping to live edge");
        engine.seek(target);
        self.snapshot.live_edge_offset_secs = Some((range.end - target).max(0.0));
    }
}
