/*!
Automatic scenario dispatch.

The engine polls a [`DistanceSource`], compares every valid line against the
last distance it saw and, for each change, resolves a scenario for
`(distance, line number)` and transmits it. The last-known distance is
recorded before transmission, so a failed send is not retried until the
distance changes again.

One engine runs on one background thread; [`DispatchHandle`] stops and joins
it. Scenario bytes are copied out of the shared registry and the lock is
released before the port is touched.
*/

use crate::config::{AppConfig, SessionConfig};
use crate::source::{line_number, DistanceSource, SourceError};
use crate::transport::{send_scenario_packet, PortSettings, SendReport, Transport};
use crossbeam_channel::Sender;
use range_core::registry::lock;
use range_core::{RegistryError, ResolveError, ScenarioResolver, SharedRegistry};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// Sleep granularity while waiting between polls
const STOP_CHECK_INTERVAL: Duration = Duration::from_millis(50);

/// Failure while handling one changed line
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error(transparent)]
    Unresolved(#[from] ResolveError),

    #[error("Scenario unavailable: {0}")]
    Registry(#[from] RegistryError),

    #[error("Transmission failed: {0}")]
    Transport(#[from] crate::transport::TransportError),
}

/// What the engine is doing right now
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchState {
    Idle,
    Polling,
    Diffing,
    Resolving,
    Transmitting,
}

/// Published for every handled change and every failed poll
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchEvent {
    Transmitted {
        line_id: String,
        line: u8,
        distance: u32,
        scenario: String,
        report: SendReport,
    },
    Unresolved {
        line_id: String,
        line: u8,
        distance: u32,
    },
    TransmitFailed {
        line_id: String,
        line: u8,
        distance: u32,
        scenario: Option<String>,
        reason: String,
    },
    SourceFailed {
        reason: String,
    },
}

/// Dispatch statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    pub polls: u64,
    pub source_failures: u64,
    pub changes: u64,
    pub transmitted: u64,
    pub unresolved: u64,
    pub transmit_failures: u64,
}

pub struct DispatchEngine<S, T> {
    registry: SharedRegistry,
    resolver: ScenarioResolver,
    source: S,
    transport: T,
    port: PortSettings,
    session: SessionConfig,
    poll_interval: Duration,
    backoff: Duration,
    last_known: HashMap<String, u32>,
    state: DispatchState,
    stats: DispatchStats,
    running: Arc<AtomicBool>,
    events: Option<Sender<DispatchEvent>>,
}

impl<S, T> DispatchEngine<S, T>
where
    S: DistanceSource + 'static,
    T: Transport + 'static,
{
    pub fn new(registry: SharedRegistry, source: S, transport: T, config: &AppConfig) -> Self {
        Self {
            registry,
            resolver: ScenarioResolver::new(config.naming.clone()),
            source,
            transport,
            port: PortSettings::from(&config.port),
            session: config.session.clone(),
            poll_interval: config.dispatch.poll_interval(),
            backoff: config.dispatch.backoff(),
            last_known: HashMap::new(),
            state: DispatchState::Idle,
            stats: DispatchStats::default(),
            running: Arc::new(AtomicBool::new(true)),
            events: None,
        }
    }

    /// Publish events on a channel
    pub fn with_events(mut self, events: Sender<DispatchEvent>) -> Self {
        self.events = Some(events);
        self
    }

    /// Get a reference to the running flag for external control
    pub fn get_running_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    pub fn state(&self) -> DispatchState {
        self.state
    }

    pub fn stats(&self) -> DispatchStats {
        self.stats
    }

    pub fn last_known(&self) -> &HashMap<String, u32> {
        &self.last_known
    }

    /// Record a distance as already handled
    pub fn set_last_known(&mut self, line_id: impl Into<String>, distance: u32) {
        self.last_known.insert(line_id.into(), distance);
    }

    /// Create the auto-scenarios and seed the last-known distances from the
    /// source without transmitting anything. A failing source is logged and
    /// leaves the table empty. Returns the names of the created scenarios.
    pub fn prepare(&mut self) -> Vec<String> {
        let created = lock(&self.registry).prepare_auto_scenarios();
        if !created.is_empty() {
            info!("🧩 Created {} auto-scenarios", created.len());
        }

        match self.source.fetch() {
            Ok(distances) => {
                for (line_id, distance) in distances {
                    if line_number(&line_id).is_some() {
                        info!("📏 Initial distance for {}: {} m", line_id, distance);
                        self.last_known.insert(line_id, distance);
                    }
                }
            }
            Err(e) => warn!("⚠️ Failed to read initial distances: {}", e),
        }

        created
    }

    /// Run one poll. Returns the number of changed lines handled.
    pub fn tick(&mut self) -> Result<usize, SourceError> {
        self.state = DispatchState::Polling;
        let distances = match self.source.fetch() {
            Ok(distances) => distances,
            Err(e) => {
                self.stats.source_failures += 1;
                self.state = DispatchState::Idle;
                error!("❌ Failed to read distances: {}", e);
                self.emit(DispatchEvent::SourceFailed { reason: e.to_string() });
                return Err(e);
            }
        };
        self.stats.polls += 1;

        self.state = DispatchState::Diffing;
        let mut changed = 0;
        for (line_id, distance) in distances {
            let Some(line) = line_number(&line_id) else {
                debug!("Ignoring unknown line id {}", line_id);
                continue;
            };

            let previous = self.last_known.get(&line_id).copied();
            if previous == Some(distance) {
                continue;
            }

            info!(
                "[{}] 🎯 {} distance changed: {} -> {} m",
                chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
                line_id,
                previous.map_or_else(|| "none".to_string(), |d| d.to_string()),
                distance
            );
            self.last_known.insert(line_id.clone(), distance);
            self.stats.changes += 1;
            changed += 1;

            let event = self.dispatch_line(line_id, line, distance);
            self.emit(event);
            self.state = DispatchState::Diffing;
        }

        self.state = DispatchState::Idle;
        Ok(changed)
    }

    fn dispatch_line(&mut self, line_id: String, line: u8, distance: u32) -> DispatchEvent {
        self.state = DispatchState::Resolving;
        let (name, packet) = match self.resolve(distance, line) {
            Ok(resolved) => resolved,
            Err(DispatchError::Unresolved(e)) => {
                self.stats.unresolved += 1;
                warn!("⚠️ {}", e);
                return DispatchEvent::Unresolved { line_id, line, distance };
            }
            Err(e) => {
                self.stats.transmit_failures += 1;
                error!("❌ {}: {}", line_id, e);
                return DispatchEvent::TransmitFailed {
                    line_id,
                    line,
                    distance,
                    scenario: None,
                    reason: e.to_string(),
                };
            }
        };

        self.state = DispatchState::Transmitting;
        info!("📡 Sending scenario '{}' for {} ({} m, remote {})", name, line_id, distance, line);
        match self.transmit(&packet) {
            Ok(report) => {
                self.stats.transmitted += 1;
                info!("✅ Scenario '{}' sent ({} bytes)", name, report.bytes_written);
                DispatchEvent::Transmitted {
                    line_id,
                    line,
                    distance,
                    scenario: name,
                    report,
                }
            }
            Err(e) => {
                self.stats.transmit_failures += 1;
                error!("❌ Failed to send scenario '{}': {}", name, e);
                DispatchEvent::TransmitFailed {
                    line_id,
                    line,
                    distance,
                    scenario: Some(name),
                    reason: e.to_string(),
                }
            }
        }
    }

    fn transmit(&mut self, packet: &[u8]) -> Result<SendReport, DispatchError> {
        Ok(send_scenario_packet(&mut self.transport, &self.port, &self.session, packet)?)
    }

    /// Resolve and copy the packet bytes while holding the registry lock
    fn resolve(&self, distance: u32, remote_type: u8) -> Result<(String, Vec<u8>), DispatchError> {
        let registry = lock(&self.registry);
        let name = self.resolver.resolve(&registry, distance, remote_type)?;
        let packet = registry.wire_bytes(&name)?;
        Ok((name, packet))
    }

    fn emit(&self, event: DispatchEvent) {
        if let Some(events) = &self.events {
            if events.send(event).is_err() {
                debug!("Dispatch event receiver dropped");
            }
        }
    }

    /// Sleep up to `total`, returning early once stopped
    fn wait(&self, total: Duration) {
        let deadline = Instant::now() + total;
        while self.running.load(Ordering::SeqCst) {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            thread::sleep(STOP_CHECK_INTERVAL.min(deadline - now));
        }
    }

    /// Pause before the next poll: the regular interval, or the backoff after
    /// a failed read
    fn next_pause(&self, result: &Result<usize, SourceError>) -> Duration {
        match result {
            Ok(_) => self.poll_interval,
            Err(_) => self.backoff,
        }
    }

    /// Poll until the running flag is cleared
    pub fn run(mut self) -> DispatchStats {
        info!("🚀 Dispatch loop started (poll every {:?})", self.poll_interval);

        while self.running.load(Ordering::SeqCst) {
            let result = self.tick();
            let pause = self.next_pause(&result);
            self.wait(pause);
        }

        self.state = DispatchState::Idle;
        info!(
            "🛑 Dispatch loop stopped: {} polls, {} changes, {} sent, {} unresolved, {} failed sends, {} source errors",
            self.stats.polls,
            self.stats.changes,
            self.stats.transmitted,
            self.stats.unresolved,
            self.stats.transmit_failures,
            self.stats.source_failures
        );
        self.stats
    }

    /// Prepare and run the loop on a background thread
    pub fn start(mut self) -> std::io::Result<DispatchHandle> {
        self.prepare();
        let running = self.get_running_flag();
        let thread = thread::Builder::new()
            .name("dispatch".to_string())
            .spawn(move || self.run())?;

        Ok(DispatchHandle { running, thread })
    }
}

/// Control handle of a running dispatch thread
pub struct DispatchHandle {
    running: Arc<AtomicBool>,
    thread: JoinHandle<DispatchStats>,
}

impl DispatchHandle {
    pub fn get_running_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst) && !self.thread.is_finished()
    }

    /// Ask the loop to stop after the current poll
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// Stop and wait for the thread, returning its final statistics
    pub fn join(self) -> anyhow::Result<DispatchStats> {
        self.stop();
        self.thread
            .join()
            .map_err(|_| anyhow::anyhow!("Dispatch thread panicked"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::DistanceMap;
    use crate::transport::mock::{immediate_session, MockTransport};
    use crossbeam_channel::unbounded;
    use range_core::protocol::INIT_SEQUENCE;
    use range_core::{Command, Scenario, ScenarioRegistry};
    use std::collections::VecDeque;

    /// Returns scripted results, repeating the last one forever
    struct ScriptedSource {
        script: VecDeque<Result<DistanceMap, String>>,
        last: Result<DistanceMap, String>,
    }

    impl ScriptedSource {
        fn new(script: Vec<Result<Vec<(&str, u32)>, &str>>) -> Self {
            let script: VecDeque<Result<DistanceMap, String>> = script
                .into_iter()
                .map(|step| {
                    step.map(|lines| lines.into_iter().map(|(k, v)| (k.to_string(), v)).collect())
                        .map_err(str::to_string)
                })
                .collect();
            Self {
                script,
                last: Ok(DistanceMap::new()),
            }
        }
    }

    impl DistanceSource for ScriptedSource {
        fn fetch(&mut self) -> Result<DistanceMap, SourceError> {
            if let Some(step) = self.script.pop_front() {
                self.last = step;
            }
            self.last.clone().map_err(SourceError::Format)
        }
    }

    fn test_config() -> AppConfig {
        let mut config = AppConfig::new();
        config.session = immediate_session();
        config.dispatch.poll_interval_ms = 10;
        config.dispatch.backoff_ms = 10;
        config
    }

    fn engine(
        registry: ScenarioRegistry,
        source: ScriptedSource,
        transport: MockTransport,
    ) -> DispatchEngine<ScriptedSource, MockTransport> {
        DispatchEngine::new(registry.into_shared(), source, transport, &test_config())
    }

    #[test]
    fn test_changed_line_transmits_once_even_on_failure() {
        let mut registry = ScenarioRegistry::new();
        registry.insert(Scenario::from_raw("AUTO_P2_12M", 2, vec![0x7E, 0x00, 0x02]));

        let transport = MockTransport::failing();
        let source = ScriptedSource::new(vec![Ok(vec![("line_2", 12)])]);
        let mut engine = engine(registry, source, transport.clone());
        engine.set_last_known("line_2", 10);

        let (tx, rx) = unbounded();
        let mut engine = engine.with_events(tx);

        assert_eq!(engine.tick().unwrap(), 1);
        assert_eq!(transport.opens(), 1);
        assert_eq!(engine.last_known()["line_2"], 12);
        assert!(matches!(
            rx.try_recv().unwrap(),
            DispatchEvent::TransmitFailed { line: 2, distance: 12, scenario: Some(ref s), .. } if s == "AUTO_P2_12M"
        ));

        // Same distance again: no retry.
        assert_eq!(engine.tick().unwrap(), 0);
        assert_eq!(transport.opens(), 1);
        assert_eq!(engine.stats().transmit_failures, 1);
    }

    #[test]
    fn test_transmits_resolved_packet() {
        let mut registry = ScenarioRegistry::with_builtin();
        let expected = registry.wire_bytes("range_3m_pulse1").unwrap();
        registry.insert(
            Scenario::new("Сценарий 40м пульт 4", 4)
                .with_commands(vec![Command::from_code(range_core::catalog::codes::SET_RANGE, 4000).unwrap()]),
        );
        let encoded = registry.wire_bytes("Сценарий 40м пульт 4").unwrap();

        let transport = MockTransport::default();
        let source = ScriptedSource::new(vec![Ok(vec![("line_1", 3), ("line4", 40)])]);
        let mut engine = engine(registry, source, transport.clone());

        assert_eq!(engine.tick().unwrap(), 2);
        assert_eq!(
            transport.writes(),
            // "line4" sorts before "line_1".
            vec![INIT_SEQUENCE.to_vec(), encoded, INIT_SEQUENCE.to_vec(), expected]
        );
        assert_eq!(engine.stats().transmitted, 2);
        assert_eq!(engine.state(), DispatchState::Idle);
    }

    #[test]
    fn test_unchanged_and_invalid_lines_ignored() {
        let mut registry = ScenarioRegistry::new();
        registry.insert(Scenario::from_raw("AUTO_P1_5M", 1, vec![0x7E]));

        let transport = MockTransport::default();
        let source = ScriptedSource::new(vec![Ok(vec![("line_1", 5), ("line_9", 5), ("lobby", 5)])]);
        let mut engine = engine(registry, source, transport.clone());
        engine.set_last_known("line_1", 5);

        assert_eq!(engine.tick().unwrap(), 0);
        assert_eq!(transport.opens(), 0);
        assert!(!engine.last_known().contains_key("line_9"));
    }

    #[test]
    fn test_unresolved_line_does_not_block_others() {
        let mut registry = ScenarioRegistry::new();
        registry.insert(Scenario::from_raw("lane 20", 3, vec![0x7E, 0x00]));

        let transport = MockTransport::default();
        let source = ScriptedSource::new(vec![Ok(vec![("line_1", 99), ("line_3", 20)])]);
        let (tx, rx) = unbounded();
        let mut engine = engine(registry, source, transport.clone()).with_events(tx);

        assert_eq!(engine.tick().unwrap(), 2);
        let events: Vec<DispatchEvent> = rx.try_iter().collect();
        assert_eq!(events.len(), 2);
        assert_eq!(
            events[0],
            DispatchEvent::Unresolved {
                line_id: "line_1".to_string(),
                line: 1,
                distance: 99
            }
        );
        assert!(matches!(&events[1], DispatchEvent::Transmitted { scenario, .. } if scenario == "lane 20"));
        assert_eq!(engine.last_known()["line_1"], 99);
        assert_eq!(transport.opens(), 1);
    }

    #[test]
    fn test_untransmittable_scenario_reports_failure() {
        let mut registry = ScenarioRegistry::new();
        registry.insert(Scenario::new("AUTO_P6_8M", 6));

        let transport = MockTransport::default();
        let source = ScriptedSource::new(vec![Ok(vec![("line_6", 8)])]);
        let (tx, rx) = unbounded();
        let mut engine = engine(registry, source, transport.clone()).with_events(tx);

        engine.tick().unwrap();
        assert!(matches!(rx.try_recv().unwrap(), DispatchEvent::TransmitFailed { scenario: None, .. }));
        assert_eq!(transport.opens(), 0);
    }

    #[test]
    fn test_source_failure_keeps_state() {
        let transport = MockTransport::default();
        let source = ScriptedSource::new(vec![Err("offline")]);
        let (tx, rx) = unbounded();
        let mut engine = engine(ScenarioRegistry::new(), source, transport).with_events(tx);
        engine.set_last_known("line_1", 7);

        assert!(engine.tick().is_err());
        assert_eq!(engine.stats().source_failures, 1);
        assert_eq!(engine.last_known()["line_1"], 7);
        assert!(matches!(rx.try_recv().unwrap(), DispatchEvent::SourceFailed { .. }));
    }

    #[test]
    fn test_failed_poll_waits_for_backoff() {
        let mut config = test_config();
        config.dispatch.poll_interval_ms = 2000;
        config.dispatch.backoff_ms = 5000;
        let engine = DispatchEngine::new(
            ScenarioRegistry::new().into_shared(),
            ScriptedSource::new(vec![]),
            MockTransport::default(),
            &config,
        );

        assert_eq!(engine.next_pause(&Ok(0)), Duration::from_millis(2000));
        assert_eq!(engine.next_pause(&Ok(3)), Duration::from_millis(2000));
        assert_eq!(
            engine.next_pause(&Err(SourceError::Format("offline".to_string()))),
            Duration::from_millis(5000)
        );
    }

    #[test]
    fn test_failing_source_is_not_polled_at_regular_interval() {
        let mut config = test_config();
        config.dispatch.poll_interval_ms = 10;
        config.dispatch.backoff_ms = 60_000;
        let engine = DispatchEngine::new(
            ScenarioRegistry::new().into_shared(),
            ScriptedSource::new(vec![Err("offline")]),
            MockTransport::default(),
            &config,
        );

        let handle = engine.start().unwrap();
        thread::sleep(Duration::from_millis(300));
        let started = Instant::now();
        let stats = handle.join().unwrap();

        // One failed poll, then parked in the backoff until stopped.
        assert_eq!(stats.source_failures, 1);
        assert_eq!(stats.polls, 0);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_prepare_seeds_without_sending() {
        let mut registry = ScenarioRegistry::new();
        registry.insert(Scenario::from_raw("range 25m", 3, vec![0x7E, 0x00]));

        let transport = MockTransport::default();
        let source = ScriptedSource::new(vec![Ok(vec![("line_3", 25), ("line_8", 4)])]);
        let mut engine = engine(registry, source, transport.clone());

        let created = engine.prepare();
        assert_eq!(created, vec!["AUTO_P3_25M".to_string()]);
        assert_eq!(engine.last_known().len(), 1);
        assert_eq!(engine.last_known()["line_3"], 25);

        // Seeded value is not treated as a change.
        assert_eq!(engine.tick().unwrap(), 0);
        assert_eq!(transport.opens(), 0);
    }

    #[test]
    fn test_prepare_tolerates_source_failure() {
        let source = ScriptedSource::new(vec![Err("offline")]);
        let mut engine = engine(ScenarioRegistry::new(), source, MockTransport::default());
        assert!(engine.prepare().is_empty());
        assert!(engine.last_known().is_empty());
    }

    #[test]
    fn test_background_thread_stops() {
        let mut registry = ScenarioRegistry::new();
        registry.insert(Scenario::from_raw("AUTO_P1_5M", 1, vec![0x7E, 0x00, 0x01]));

        let transport = MockTransport::default();
        // Seed read sees nothing, the first poll sees line_1 at 5 m.
        let source = ScriptedSource::new(vec![Ok(vec![]), Ok(vec![("line_1", 5)])]);
        let (tx, rx) = unbounded();
        let handle = engine(registry, source, transport.clone())
            .with_events(tx)
            .start()
            .unwrap();

        let event = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(matches!(event, DispatchEvent::Transmitted { line: 1, distance: 5, .. }));

        handle.stop();
        let stats = handle.join().unwrap();
        assert!(stats.polls >= 1);
        assert_eq!(stats.transmitted, 1);
        assert_eq!(transport.opens(), 1);
    }
}
