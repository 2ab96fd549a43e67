mod livekit;
mod token;

use crate::error::ServiceResult;
use crate::utils::format_elapsed;
use async_trait::async_trait;
pub use livekit::LiveKitTransport;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, interval_at};
pub use token::{HttpTokenSource, MediaGrant, TokenSource};
use tracing::{debug, error, info, warn};

const TICK: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallStatus {
    Connecting,
    Connected { elapsed: u64 },
    Error(String),
    Closed,
}

impl CallStatus {
    pub fn overlay_text(&self) -> String {
        match self {
            CallStatus::Connecting => "Connecting...".to_string(),
            CallStatus::Connected { elapsed } => format_elapsed(*elapsed),
            CallStatus::Error(_) => "Connection failed".to_string(),
            CallStatus::Closed => "Call ended".to_string(),
        }
    }

    pub fn failure(&self) -> Option<&str> {
        match self {
            CallStatus::Error(reason) => Some(reason),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackKind {
    Audio,
    Video,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteTrack {
    pub sid: String,
    pub kind: TrackKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackEvent {
    Subscribed(RemoteTrack),
    Unsubscribed(RemoteTrack),
}

#[async_trait]
pub trait MediaTransport: Send + Sync {
    async fn connect(&self, url: &str, token: &str) -> ServiceResult<Box<dyn RoomSession>>;
}

#[async_trait]
pub trait RoomSession: Send + Sync {
    async fn set_microphone_enabled(&self, enabled: bool) -> ServiceResult<()>;
    // Handed out once.
    fn take_track_events(&mut self) -> Option<mpsc::Receiver<TrackEvent>>;
    async fn disconnect(&self);
}

pub trait AudioSink: Send + Sync {
    fn attach(&self, track: &RemoteTrack);
    fn detach(&self, track: &RemoteTrack);
}

pub struct LoggingSink;

impl AudioSink for LoggingSink {
    fn attach(&self, track: &RemoteTrack) {
        info!("Playing remote audio track {}", track.sid);
    }

    fn detach(&self, track: &RemoteTrack) {
        info!("Stopped remote audio track {}", track.sid);
    }
}

#[derive(Default)]
struct Resources {
    room: Option<Arc<dyn RoomSession>>,
    tasks: Vec<JoinHandle<()>>,
    attached: Vec<RemoteTrack>,
}

struct CallInner {
    status: watch::Sender<CallStatus>,
    closed: AtomicBool,
    resources: Mutex<Resources>,
    sink: Arc<dyn AudioSink>,
}

impl CallInner {
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn new(sink: Arc<dyn AudioSink>) -> Self {
        let (status, _) = watch::channel(CallStatus::Connecting);
        Self {
            status,
            closed: AtomicBool::new(false),
            resources: Mutex::new(Resources::default()),
            sink,
        }
    }

    // Checked under the lock so a concurrent teardown always publishes last.
    fn publish(&self, status: CallStatus) -> bool {
        let Ok(_resources) = self.resources.lock() else {
            return false;
        };
        if self.is_closed() {
            return false;
        }
        self.status.send_replace(status);
        true
    }

    fn fail(&self, reason: String) {
        let message = reason.clone();
        if self.publish(CallStatus::Error(reason)) {
            error!("Call failed: {}", message);
        }
    }

    fn adopt(&self, task: JoinHandle<()>) {
        match self.resources.lock() {
            Ok(mut resources) if !self.is_closed() => resources.tasks.push(task),
            _ => task.abort(),
        }
    }

    fn teardown(&self) -> Option<Arc<dyn RoomSession>> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return None;
        }

        let mut guard = match self.resources.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let resources = std::mem::take(&mut *guard);
        for task in &resources.tasks {
            task.abort();
        }
        for track in &resources.attached {
            self.sink.detach(track);
        }
        self.status.send_replace(CallStatus::Closed);
        drop(guard);
        info!("Call released");
        resources.room
    }

    fn on_track(&self, event: TrackEvent) {
        let Ok(mut resources) = self.resources.lock() else {
            return;
        };
        if self.is_closed() {
            return;
        }
        match event {
            TrackEvent::Subscribed(track) if track.kind == TrackKind::Audio => {
                self.sink.attach(&track);
                resources.attached.push(track);
            }
            TrackEvent::Subscribed(track) => debug!("Ignoring non-audio track {}", track.sid),
            TrackEvent::Unsubscribed(track) => {
                if let Some(pos) = resources.attached.iter().position(|t| t.sid == track.sid) {
                    let track = resources.attached.remove(pos);
                    self.sink.detach(&track);
                }
            }
        }
    }
}

// Dropping the handle releases the call like `hangup`.
pub struct CallSession {
    inner: Arc<CallInner>,
}

impl CallSession {
    pub fn start(
        tokens: Arc<dyn TokenSource>,
        transport: Arc<dyn MediaTransport>,
        sink: Arc<dyn AudioSink>,
    ) -> Self {
        let inner = Arc::new(CallInner::new(sink));

        // Not adopted: teardown must not cancel an in-flight join, the task
        // disconnects a late room itself.
        tokio::spawn(connect(inner.clone(), tokens, transport));

        Self { inner }
    }

    pub fn status(&self) -> CallStatus {
        self.inner.status.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<CallStatus> {
        self.inner.status.subscribe()
    }

    pub async fn hangup(&self) {
        if let Some(room) = self.inner.teardown() {
            room.disconnect().await;
        }
    }
}

impl Drop for CallSession {
    fn drop(&mut self) {
        let Some(room) = self.inner.teardown() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move { room.disconnect().await });
            }
            Err(_) => warn!("Call dropped outside the runtime, room left without disconnect"),
        }
    }
}

async fn connect(
    inner: Arc<CallInner>,
    tokens: Arc<dyn TokenSource>,
    transport: Arc<dyn MediaTransport>,
) {
    let grant = match tokens.fetch().await {
        Ok(grant) => grant,
        Err(e) => return inner.fail(format!("token request failed: {}", e)),
    };
    if inner.is_closed() {
        return;
    }

    let mut room = match transport.connect(&grant.url, &grant.token).await {
        Ok(room) => room,
        Err(e) => return inner.fail(format!("room connect failed: {}", e)),
    };
    let events = room.take_track_events();
    let room: Arc<dyn RoomSession> = Arc::from(room);

    let late = match inner.resources.lock() {
        Ok(mut resources) if !inner.is_closed() => {
            resources.room = Some(room.clone());
            false
        }
        _ => true,
    };
    if late {
        info!("Room connected after hangup, disconnecting");
        room.disconnect().await;
        return;
    }

    if let Some(mut events) = events {
        let pump_inner = inner.clone();
        inner.adopt(tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                pump_inner.on_track(event);
            }
            debug!("Track event stream ended");
        }));
    }

    if let Err(e) = room.set_microphone_enabled(true).await {
        return inner.fail(format!("microphone unavailable: {}", e));
    }
    if !inner.publish(CallStatus::Connected { elapsed: 0 }) {
        return;
    }
    info!("Call connected");

    let timer_inner = inner.clone();
    inner.adopt(tokio::spawn(async move {
        let mut ticks = interval_at(Instant::now() + TICK, TICK);
        loop {
            ticks.tick().await;
            timer_inner.status.send_modify(|status| {
                if let CallStatus::Connected { elapsed } = status {
                    *elapsed += 1;
                }
            });
        }
    }));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ServiceError;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::Notify;

    struct FixedTokens(Option<MediaGrant>);

    #[async_trait]
    impl TokenSource for FixedTokens {
        async fn fetch(&self) -> ServiceResult<MediaGrant> {
            self.0
                .clone()
                .ok_or_else(|| ServiceError::Backend { status: 500, body: "down".to_string() })
        }
    }

    fn grant() -> Arc<FixedTokens> {
        Arc::new(FixedTokens(Some(MediaGrant {
            token: "jwt".to_string(),
            url: "wss://media.example".to_string(),
        })))
    }

    #[derive(Default)]
    struct RoomTracker {
        connecting: Notify,
        disconnects: AtomicUsize,
        disconnected: Notify,
        events: Mutex<Option<mpsc::Sender<TrackEvent>>>,
    }

    struct FakeRoom {
        tracker: Arc<RoomTracker>,
        events: Option<mpsc::Receiver<TrackEvent>>,
        mic_fails: bool,
    }

    #[async_trait]
    impl RoomSession for FakeRoom {
        async fn set_microphone_enabled(&self, _enabled: bool) -> ServiceResult<()> {
            if self.mic_fails {
                Err(ServiceError::Media("no input device".to_string()))
            } else {
                Ok(())
            }
        }

        fn take_track_events(&mut self) -> Option<mpsc::Receiver<TrackEvent>> {
            self.events.take()
        }

        async fn disconnect(&self) {
            self.tracker.disconnects.fetch_add(1, Ordering::SeqCst);
            self.tracker.disconnected.notify_one();
        }
    }

    #[derive(Default)]
    struct FakeTransport {
        tracker: Arc<RoomTracker>,
        gate: Option<Arc<Notify>>,
        fails: bool,
        mic_fails: bool,
    }

    #[async_trait]
    impl MediaTransport for FakeTransport {
        async fn connect(&self, _url: &str, _token: &str) -> ServiceResult<Box<dyn RoomSession>> {
            if let Some(gate) = &self.gate {
                self.tracker.connecting.notify_one();
                gate.notified().await;
            }
            if self.fails {
                return Err(ServiceError::Media("unreachable".to_string()));
            }
            let (tx, rx) = mpsc::channel(8);
            *self.tracker.events.lock().unwrap() = Some(tx);
            Ok(Box::new(FakeRoom {
                tracker: self.tracker.clone(),
                events: Some(rx),
                mic_fails: self.mic_fails,
            }))
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        playing: Mutex<Vec<String>>,
    }

    impl AudioSink for RecordingSink {
        fn attach(&self, track: &RemoteTrack) {
            self.playing.lock().unwrap().push(track.sid.clone());
        }

        fn detach(&self, track: &RemoteTrack) {
            self.playing.lock().unwrap().retain(|sid| sid != &track.sid);
        }
    }

    fn audio(sid: &str) -> RemoteTrack {
        RemoteTrack {
            sid: sid.to_string(),
            kind: TrackKind::Audio,
        }
    }

    async fn connected(call: &CallSession) {
        call.subscribe()
            .wait_for(|s| matches!(s, CallStatus::Connected { .. }))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn connects_and_hangs_up_exactly_once() {
        let transport = Arc::new(FakeTransport::default());
        let tracker = transport.tracker.clone();
        let call = CallSession::start(grant(), transport, Arc::new(LoggingSink));
        assert_eq!(call.status().overlay_text(), "Connecting...");

        connected(&call).await;
        assert_eq!(call.status().overlay_text(), "00:00");

        call.hangup().await;
        call.hangup().await;
        drop(call);
        assert_eq!(tracker.disconnects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn timer_counts_seconds_while_connected() {
        let call = CallSession::start(
            grant(),
            Arc::new(FakeTransport::default()),
            Arc::new(LoggingSink),
        );
        connected(&call).await;

        tokio::time::sleep(Duration::from_millis(3500)).await;
        assert_eq!(call.status(), CallStatus::Connected { elapsed: 3 });

        call.hangup().await;
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(call.status(), CallStatus::Closed);
    }

    #[tokio::test]
    async fn token_failure_shows_connection_failed() {
        let call = CallSession::start(
            Arc::new(FixedTokens(None)),
            Arc::new(FakeTransport::default()),
            Arc::new(LoggingSink),
        );
        let mut rx = call.subscribe();
        rx.wait_for(|s| matches!(s, CallStatus::Error(_))).await.unwrap();
        assert_eq!(call.status().overlay_text(), "Connection failed");
        assert!(call.status().failure().unwrap().contains("token request failed"));

        call.hangup().await;
        call.hangup().await;
        assert_eq!(call.status(), CallStatus::Closed);
    }

    #[tokio::test]
    async fn failed_microphone_still_releases_room() {
        let transport = Arc::new(FakeTransport {
            mic_fails: true,
            ..Default::default()
        });
        let tracker = transport.tracker.clone();
        let call = CallSession::start(grant(), transport, Arc::new(LoggingSink));

        call.subscribe()
            .wait_for(|s| matches!(s, CallStatus::Error(_)))
            .await
            .unwrap();
        call.hangup().await;
        assert_eq!(tracker.disconnects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn room_connect_failure_is_an_error() {
        let transport = Arc::new(FakeTransport {
            fails: true,
            ..Default::default()
        });
        let tracker = transport.tracker.clone();
        let call = CallSession::start(grant(), transport, Arc::new(LoggingSink));

        call.subscribe()
            .wait_for(|s| matches!(s, CallStatus::Error(_)))
            .await
            .unwrap();
        drop(call);
        assert_eq!(tracker.disconnects.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn late_room_is_disconnected_without_touching_state() {
        let gate = Arc::new(Notify::new());
        let transport = Arc::new(FakeTransport {
            gate: Some(gate.clone()),
            ..Default::default()
        });
        let tracker = transport.tracker.clone();
        let call = CallSession::start(grant(), transport, Arc::new(LoggingSink));

        tracker.connecting.notified().await;
        call.hangup().await;
        gate.notify_one();

        tokio::time::timeout(Duration::from_secs(5), tracker.disconnected.notified())
            .await
            .unwrap();
        assert_eq!(tracker.disconnects.load(Ordering::SeqCst), 1);
        assert_eq!(call.status(), CallStatus::Closed);
    }

    #[test]
    fn track_arriving_after_teardown_is_not_played() {
        let sink = Arc::new(RecordingSink::default());
        let inner = CallInner::new(sink.clone());
        assert!(inner.teardown().is_none());

        inner.on_track(TrackEvent::Subscribed(audio("a1")));
        inner.teardown();
        assert!(sink.playing.lock().unwrap().is_empty());
    }

    #[test]
    fn status_after_teardown_stays_closed() {
        let inner = CallInner::new(Arc::new(LoggingSink));
        inner.teardown();

        inner.fail("late failure".to_string());
        assert!(!inner.publish(CallStatus::Connected { elapsed: 0 }));
        assert_eq!(*inner.status.borrow(), CallStatus::Closed);
    }

    #[test]
    fn failure_before_teardown_is_replaced_by_closed() {
        let inner = CallInner::new(Arc::new(LoggingSink));
        inner.fail("token request failed".to_string());
        assert_eq!(inner.status.borrow().failure(), Some("token request failed"));

        inner.teardown();
        assert_eq!(*inner.status.borrow(), CallStatus::Closed);
    }

    #[tokio::test]
    async fn only_audio_tracks_are_played_and_released() {
        let transport = Arc::new(FakeTransport::default());
        let tracker = transport.tracker.clone();
        let sink = Arc::new(RecordingSink::default());
        let call = CallSession::start(grant(), transport, sink.clone());
        connected(&call).await;

        let events = tracker.events.lock().unwrap().clone().unwrap();
        events.send(TrackEvent::Subscribed(audio("a1"))).await.unwrap();
        events
            .send(TrackEvent::Subscribed(RemoteTrack {
                sid: "v1".to_string(),
                kind: TrackKind::Video,
            }))
            .await
            .unwrap();
        events.send(TrackEvent::Subscribed(audio("a2"))).await.unwrap();
        events.send(TrackEvent::Unsubscribed(audio("a1"))).await.unwrap();

        for _ in 0..100 {
            if sink.playing.lock().unwrap().as_slice() == ["a2"] {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(sink.playing.lock().unwrap().clone(), vec!["a2".to_string()]);

        call.hangup().await;
        assert!(sink.playing.lock().unwrap().is_empty());
    }
}
