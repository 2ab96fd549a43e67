use super::{MediaTransport, RemoteTrack, RoomSession, TrackEvent, TrackKind};
use crate::error::{ServiceError, ServiceResult};
use async_trait::async_trait;
use livekit::options::TrackPublishOptions;
use livekit::publication::LocalTrackPublication;
use livekit::track::{LocalAudioTrack, LocalTrack, RemoteTrack as RoomTrack, TrackSource};
use livekit::webrtc::audio_source::native::NativeAudioSource;
use livekit::webrtc::audio_source::{AudioSourceOptions, RtcAudioSource};
use livekit::{Room, RoomEvent, RoomOptions};
use std::sync::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const TRACK_EVENT_BUFFER: usize = 32;
const MIC_SAMPLE_RATE: u32 = 48_000;
const MIC_CHANNELS: u32 = 1;
const MIC_QUEUE_MS: u32 = 100;

pub struct LiveKitTransport;

fn describe(track: &RoomTrack) -> RemoteTrack {
    let kind = match track {
        RoomTrack::Audio(_) => TrackKind::Audio,
        RoomTrack::Video(_) => TrackKind::Video,
    };
    RemoteTrack {
        sid: track.sid().to_string(),
        kind,
    }
}

fn track_event(event: &RoomEvent) -> Option<TrackEvent> {
    match event {
        RoomEvent::TrackSubscribed { track, .. } => Some(TrackEvent::Subscribed(describe(track))),
        RoomEvent::TrackUnsubscribed { track, .. } => {
            Some(TrackEvent::Unsubscribed(describe(track)))
        }
        _ => None,
    }
}

#[async_trait]
impl MediaTransport for LiveKitTransport {
    async fn connect(&self, url: &str, token: &str) -> ServiceResult<Box<dyn RoomSession>> {
        let (room, mut room_events) = Room::connect(url, token, RoomOptions::default())
            .await
            .map_err(|e| ServiceError::Media(format!("room join failed: {}", e)))?;
        info!("Joined media room {} at {}", room.name(), url);

        let (tx, rx) = mpsc::channel(TRACK_EVENT_BUFFER);
        let pump = tokio::spawn(async move {
            while let Some(event) = room_events.recv().await {
                if let RoomEvent::Disconnected { reason } = &event {
                    warn!("Media room disconnected: {:?}", reason);
                    break;
                }
                let Some(event) = track_event(&event) else {
                    continue;
                };
                if tx.send(event).await.is_err() {
                    break;
                }
            }
            debug!("Room event stream ended");
        });

        Ok(Box::new(LiveKitRoom {
            room,
            url: url.to_string(),
            events: Some(rx),
            pump: Mutex::new(Some(pump)),
            microphone: tokio::sync::Mutex::new(None),
        }))
    }
}

struct LiveKitRoom {
    room: Room,
    url: String,
    events: Option<mpsc::Receiver<TrackEvent>>,
    pump: Mutex<Option<JoinHandle<()>>>,
    microphone: tokio::sync::Mutex<Option<LocalTrackPublication>>,
}

impl LiveKitRoom {
    async fn publish_microphone(&self) -> ServiceResult<LocalTrackPublication> {
        let source = NativeAudioSource::new(
            AudioSourceOptions::default(),
            MIC_SAMPLE_RATE,
            MIC_CHANNELS,
            MIC_QUEUE_MS,
        );
        let track = LocalAudioTrack::create_audio_track("microphone", RtcAudioSource::Native(source));
        let options = TrackPublishOptions {
            source: TrackSource::Microphone,
            ..Default::default()
        };
        self.room
            .local_participant()
            .publish_track(LocalTrack::Audio(track), options)
            .await
            .map_err(|e| ServiceError::Media(format!("microphone publish failed: {}", e)))
    }
}

#[async_trait]
impl RoomSession for LiveKitRoom {
    async fn set_microphone_enabled(&self, enabled: bool) -> ServiceResult<()> {
        let mut microphone = self.microphone.lock().await;
        if let Some(publication) = microphone.as_ref() {
            if enabled {
                publication.unmute();
            } else {
                publication.mute();
            }
        } else if enabled {
            *microphone = Some(self.publish_microphone().await?);
        }
        info!(
            "Microphone {} for {}",
            if enabled { "enabled" } else { "disabled" },
            self.url
        );
        Ok(())
    }

    fn take_track_events(&mut self) -> Option<mpsc::Receiver<TrackEvent>> {
        self.events.take()
    }

    async fn disconnect(&self) {
        if let Some(pump) = self.pump.lock().ok().and_then(|mut pump| pump.take()) {
            pump.abort();
        }
        if let Err(e) = self.room.close().await {
            warn!("Closing media room failed: {}", e);
        }
        info!("Left media room at {}", self.url);
    }
}
