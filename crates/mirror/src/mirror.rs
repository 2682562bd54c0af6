use crate::payload::{render, ActivityPayload, RenderOptions};
use crate::transport::{
    presence_supported, StatusTransport, TransportEvent, TransportFactory,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};
use watch_presence_core::{AssetsConfig, EpisodeTracker, Preferences, Presence};

/// Notification for in-process observers. Carries no payload beyond the
/// kind; interested parties query the mirror for details.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MirrorEvent {
    PresenceChanged,
    ConnectionChanged,
}

#[derive(Debug, Clone, Copy)]
enum Job {
    Push,
    Connect,
    Reset,
}

struct Shared {
    presence: Mutex<Presence>,
    connected: AtomicBool,
    prefs: Arc<dyn Preferences>,
    tracker: Arc<dyn EpisodeTracker>,
    enable_buttons: bool,
    assets: AssetsConfig,
}

impl Shared {
    // Capability and preference are read fresh on every check.
    fn enabled(&self) -> bool {
        presence_supported() && self.prefs.presence_enabled()
    }

    fn render_current(&self) -> ActivityPayload {
        let presence = self
            .presence
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        render(
            &presence,
            self.tracker.as_ref(),
            &RenderOptions {
                show_title: self.prefs.show_title(),
                enable_buttons: self.enable_buttons,
                assets: self.assets.clone(),
            },
        )
    }
}

/// Mirrors the app's watch state into the presence service.
///
/// State mutation and observer notification happen on the calling thread;
/// every transport consequence is deferred onto a single worker task, so
/// connects, resets and sends never overlap. A push renders whatever the
/// presence is when it runs, not when it was queued, so a fast-changing
/// sequence may send fewer updates than there were changes.
pub struct StatusMirror {
    shared: Arc<Shared>,
    jobs: mpsc::UnboundedSender<Job>,
    events: broadcast::Sender<MirrorEvent>,
}

impl StatusMirror {
    pub fn new(
        prefs: Arc<dyn Preferences>,
        tracker: Arc<dyn EpisodeTracker>,
        factory: Box<dyn TransportFactory>,
        enable_buttons: bool,
        assets: AssetsConfig,
    ) -> Self {
        let shared = Arc::new(Shared {
            presence: Mutex::new(Presence::Idle),
            connected: AtomicBool::new(false),
            prefs,
            tracker,
            enable_buttons,
            assets,
        });

        let (jobs_tx, jobs_rx) = mpsc::unbounded_channel();
        let (events_tx, _) = broadcast::channel(16);
        let (transport_tx, transport_rx) = mpsc::unbounded_channel();

        let worker = Worker {
            shared: Arc::clone(&shared),
            transport: factory.create(transport_tx.clone()),
            factory,
            transport_events: transport_rx,
            transport_events_tx: transport_tx,
            notify: events_tx.clone(),
        };
        tokio::spawn(worker.run(jobs_rx));

        Self {
            shared,
            jobs: jobs_tx,
            events: events_tx,
        }
    }

    /// Replace the current presence.
    ///
    /// An equal value is a complete no-op. Otherwise observers are notified
    /// immediately and one push is queued on the worker.
    pub fn update_presence(&self, new: Presence) {
        {
            let mut current = self.shared.presence.lock().unwrap_or_else(|e| e.into_inner());
            if *current == new {
                return;
            }
            *current = new;
        }
        let _ = self.events.send(MirrorEvent::PresenceChanged);
        let _ = self.jobs.send(Job::Push);
    }

    /// Schedule a connect attempt if the feature is enabled and the
    /// transport is not already connected. Returns once the attempt is
    /// queued, not once it completes.
    pub fn setup(&self) {
        if self.enabled() && !self.connected() {
            let _ = self.jobs.send(Job::Connect);
        }
    }

    /// React to the feature toggle changing: recreate the connection when
    /// enabled, tear it down when disabled. Fully deferred to the worker,
    /// which reads the preference at execution time.
    pub fn reset(&self) {
        let _ = self.jobs.send(Job::Reset);
    }

    pub fn current_presence(&self) -> Presence {
        self.shared
            .presence
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn enabled(&self) -> bool {
        self.shared.enabled()
    }

    pub fn connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MirrorEvent> {
        self.events.subscribe()
    }
}

struct Worker {
    shared: Arc<Shared>,
    transport: Box<dyn StatusTransport>,
    factory: Box<dyn TransportFactory>,
    transport_events: mpsc::UnboundedReceiver<TransportEvent>,
    // Kept so the event channel outlives transport recreation.
    transport_events_tx: mpsc::UnboundedSender<TransportEvent>,
    notify: broadcast::Sender<MirrorEvent>,
}

impl Worker {
    async fn run(mut self, mut jobs: mpsc::UnboundedReceiver<Job>) {
        loop {
            tokio::select! {
                job = jobs.recv() => match job {
                    Some(job) => self.handle_job(job).await,
                    None => break,
                },
                Some(event) = self.transport_events.recv() => {
                    self.handle_transport_event(event).await;
                }
            }
        }
    }

    async fn handle_job(&mut self, job: Job) {
        match job {
            Job::Push => self.push_if_possible().await,
            Job::Connect => {
                if self.shared.enabled() && !self.transport.is_connected() {
                    self.try_connect().await;
                }
            }
            Job::Reset => self.reset().await,
        }
    }

    async fn handle_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Connected => {
                self.shared.connected.store(true, Ordering::SeqCst);
                let _ = self.notify.send(MirrorEvent::ConnectionChanged);
                // Closes the gap where the state changed while disconnected.
                self.push_if_possible().await;
            }
            TransportEvent::Disconnected => {
                self.shared.connected.store(false, Ordering::SeqCst);
                let _ = self.notify.send(MirrorEvent::ConnectionChanged);
            }
            TransportEvent::Error { code, message } => {
                warn!(code, message = %message, "presence service reported an error");
            }
        }
    }

    async fn push_if_possible(&mut self) {
        if self.transport.is_connected() {
            let payload = self.shared.render_current();
            match self.transport.set_activity(&payload).await {
                Ok(()) => info!(state = %payload.state, "presence update sent"),
                Err(err) => warn!(error = %err, "presence update failed"),
            }
        } else if self.shared.enabled() {
            // Nothing is queued for retry; the connected event or the next
            // update sends the then-current state.
            self.try_connect().await;
        }
    }

    async fn try_connect(&mut self) {
        if let Err(err) = self.transport.connect().await {
            debug!(error = %err, "presence service not reachable");
        }
    }

    async fn reset(&mut self) {
        if self.shared.enabled() {
            self.transport.disconnect().await;
            self.transport = self.factory.create(self.transport_events_tx.clone());
            if !self.transport.is_connected() {
                self.try_connect().await;
            }
        } else if self.transport.is_connected() {
            self.transport.disconnect().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{MirrorEvent, StatusMirror};
    use crate::payload::{ActivityPayload, IDLE_STATE};
    use crate::transport::{StatusTransport, TransportEvent, TransportFactory};
    use anyhow::{bail, Result};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use tokio::sync::broadcast::error::TryRecvError;
    use tokio::sync::mpsc;
    use watch_presence_core::{
        AssetsConfig, EpisodeTracker, MediaRef, Preferences, Presence, SeriesKey,
    };

    #[derive(Default)]
    struct FakePrefs {
        enabled: AtomicBool,
        show_title: AtomicBool,
    }

    impl FakePrefs {
        fn new(enabled: bool, show_title: bool) -> Arc<Self> {
            let prefs = Self::default();
            prefs.enabled.store(enabled, Ordering::SeqCst);
            prefs.show_title.store(show_title, Ordering::SeqCst);
            Arc::new(prefs)
        }

        fn set_enabled(&self, value: bool) {
            self.enabled.store(value, Ordering::SeqCst);
        }
    }

    impl Preferences for FakePrefs {
        fn presence_enabled(&self) -> bool {
            self.enabled.load(Ordering::SeqCst)
        }

        fn show_title(&self) -> bool {
            self.show_title.load(Ordering::SeqCst)
        }
    }

    struct NoEpisodes;

    impl EpisodeTracker for NoEpisodes {
        fn episode_number(&self, _series_id: &str) -> Option<u32> {
            None
        }
    }

    #[derive(Default)]
    struct FakeWire {
        connected: AtomicBool,
        connect_ok: AtomicBool,
        connect_calls: AtomicUsize,
        disconnect_calls: AtomicUsize,
        created: AtomicUsize,
        sent: Mutex<Vec<ActivityPayload>>,
    }

    impl FakeWire {
        fn reachable() -> Arc<Self> {
            let wire = Self::default();
            wire.connect_ok.store(true, Ordering::SeqCst);
            Arc::new(wire)
        }

        fn unreachable() -> Arc<Self> {
            Arc::new(Self::default())
        }

        fn sent_count(&self) -> usize {
            self.sent.lock().unwrap().len()
        }

        fn last_sent(&self) -> Option<ActivityPayload> {
            self.sent.lock().unwrap().last().cloned()
        }
    }

    struct FakeTransport {
        wire: Arc<FakeWire>,
        events: mpsc::UnboundedSender<TransportEvent>,
    }

    #[async_trait]
    impl StatusTransport for FakeTransport {
        async fn connect(&mut self) -> Result<()> {
            self.wire.connect_calls.fetch_add(1, Ordering::SeqCst);
            if !self.wire.connect_ok.load(Ordering::SeqCst) {
                bail!("endpoint unavailable");
            }
            self.wire.connected.store(true, Ordering::SeqCst);
            let _ = self.events.send(TransportEvent::Connected);
            Ok(())
        }

        async fn disconnect(&mut self) {
            self.wire.disconnect_calls.fetch_add(1, Ordering::SeqCst);
            if self.wire.connected.swap(false, Ordering::SeqCst) {
                let _ = self.events.send(TransportEvent::Disconnected);
            }
        }

        fn is_connected(&self) -> bool {
            self.wire.connected.load(Ordering::SeqCst)
        }

        async fn set_activity(&mut self, payload: &ActivityPayload) -> Result<()> {
            self.wire.sent.lock().unwrap().push(payload.clone());
            Ok(())
        }
    }

    struct FakeFactory {
        wire: Arc<FakeWire>,
    }

    impl TransportFactory for FakeFactory {
        fn create(
            &self,
            events: mpsc::UnboundedSender<TransportEvent>,
        ) -> Box<dyn StatusTransport> {
            self.wire.created.fetch_add(1, Ordering::SeqCst);
            Box::new(FakeTransport {
                wire: Arc::clone(&self.wire),
                events,
            })
        }
    }

    fn mirror_with(prefs: Arc<FakePrefs>, wire: Arc<FakeWire>) -> StatusMirror {
        StatusMirror::new(
            prefs,
            Arc::new(NoEpisodes),
            Box::new(FakeFactory { wire }),
            true,
            AssetsConfig::default(),
        )
    }

    fn watching(series_id: &str, title: &str) -> Presence {
        Presence::Watching(MediaRef {
            item_id: format!("{series_id}-ep"),
            series: SeriesKey {
                id: series_id.to_string(),
                title: title.to_string(),
            },
        })
    }

    async fn wait_until(mut check: impl FnMut() -> bool) {
        for _ in 0..200 {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached in time");
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    #[tokio::test]
    async fn one_notification_per_distinct_transition() {
        let mirror = mirror_with(FakePrefs::new(true, true), FakeWire::unreachable());
        let mut events = mirror.subscribe();

        mirror.update_presence(watching("srs-1", "Cowboy Bebop"));
        assert_eq!(events.try_recv(), Ok(MirrorEvent::PresenceChanged));

        mirror.update_presence(watching("srs-1", "Cowboy Bebop"));
        assert_eq!(events.try_recv(), Err(TryRecvError::Empty));

        mirror.update_presence(Presence::Idle);
        assert_eq!(events.try_recv(), Ok(MirrorEvent::PresenceChanged));
    }

    #[tokio::test]
    async fn equal_value_sends_nothing() {
        let wire = FakeWire::reachable();
        let mirror = mirror_with(FakePrefs::new(true, true), Arc::clone(&wire));

        mirror.update_presence(watching("srs-1", "Cowboy Bebop"));
        wait_until(|| wire.sent_count() >= 1).await;

        mirror.update_presence(watching("srs-1", "Cowboy Bebop"));
        settle().await;

        assert_eq!(wire.sent_count(), 1);
    }

    #[tokio::test]
    async fn setup_when_disabled_touches_nothing() {
        let wire = FakeWire::reachable();
        let mirror = mirror_with(FakePrefs::new(false, true), Arc::clone(&wire));

        mirror.setup();
        settle().await;

        assert_eq!(wire.connect_calls.load(Ordering::SeqCst), 0);
        assert!(!mirror.connected());
    }

    #[tokio::test]
    async fn disabling_then_reset_disconnects_exactly_once() {
        let wire = FakeWire::reachable();
        let prefs = FakePrefs::new(true, true);
        let mirror = mirror_with(Arc::clone(&prefs), Arc::clone(&wire));

        mirror.setup();
        wait_until(|| mirror.connected()).await;

        prefs.set_enabled(false);
        mirror.reset();
        wait_until(|| !mirror.connected()).await;
        settle().await;

        assert_eq!(wire.disconnect_calls.load(Ordering::SeqCst), 1);
        assert_eq!(wire.connect_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn connect_pushes_current_presence_without_prior_update() {
        let wire = FakeWire::reachable();
        let mirror = mirror_with(FakePrefs::new(true, true), Arc::clone(&wire));

        mirror.setup();
        wait_until(|| wire.sent_count() >= 1).await;
        settle().await;

        assert_eq!(wire.sent_count(), 1);
        let payload = wire.last_sent().unwrap();
        assert_eq!(payload.state, IDLE_STATE);
    }

    #[tokio::test]
    async fn reset_while_enabled_recreates_the_transport() {
        let wire = FakeWire::reachable();
        let mirror = mirror_with(FakePrefs::new(true, true), Arc::clone(&wire));

        mirror.setup();
        wait_until(|| mirror.connected()).await;

        mirror.reset();
        wait_until(|| wire.created.load(Ordering::SeqCst) == 2).await;
        wait_until(|| mirror.connected()).await;
    }

    #[tokio::test]
    async fn push_reflects_presence_at_execution_time() {
        let wire = FakeWire::reachable();
        let mirror = mirror_with(FakePrefs::new(true, true), Arc::clone(&wire));

        mirror.setup();
        wait_until(|| mirror.connected()).await;

        mirror.update_presence(watching("srs-1", "Cowboy Bebop"));
        mirror.update_presence(watching("srs-2", "Mushishi"));
        wait_until(|| {
            wire.last_sent()
                .is_some_and(|p| p.details == "Mushishi")
        })
        .await;

        assert_eq!(mirror.current_presence(), watching("srs-2", "Mushishi"));
    }
}
