//! Wiring for a live coaching session on this machine's audio devices.

use crate::coaching::{CoachResponder, SessionDeps};
use crate::realtime::audio::{CpalMedia, RodioPlayback};
use crate::realtime::transport::{AudioFrame, RtcEngine, TransportDeps};
use crate::settings::AppSettings;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Session dependencies plus the audio handles the host's engine drives.
pub struct LiveSession {
    pub deps: SessionDeps,
    /// Captured microphone frames for the engine's outbound track.
    pub mic_frames: mpsc::UnboundedReceiver<AudioFrame>,
    /// Decoded coach audio is pushed here by the engine.
    pub playback: Arc<RodioPlayback>,
}

pub fn live_session_deps(
    settings: &AppSettings,
    engine: Arc<dyn RtcEngine>,
    coach: Arc<dyn CoachResponder>,
) -> LiveSession {
    let (frames_tx, mic_frames) = mpsc::unbounded_channel();
    let playback = Arc::new(RodioPlayback::default());

    LiveSession {
        deps: SessionDeps {
            transport: TransportDeps {
                engine,
                media: Arc::new(CpalMedia::with_frame_sink(frames_tx)),
                playback: playback.clone(),
            },
            negotiator: Arc::new(settings.signaling_client()),
            coach,
        },
        mic_frames,
        playback,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coaching::CoachClient;
    use crate::realtime::loopback::LoopbackEngine;
    use crate::realtime::Negotiator;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_live_deps_negotiate_through_configured_backend() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/realtime/ephemeral-key"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"ephemeral_key": "ek_live"})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let mut settings = AppSettings::default();
        settings.realtime.ephemeral_key_url = format!("{}/realtime/ephemeral-key", server.uri());

        let mut live = live_session_deps(
            &settings,
            Arc::new(LoopbackEngine::new()),
            Arc::new(CoachClient::new(&settings.coaching.chat_url)),
        );

        let credential = live.deps.negotiator.request_credential().await.unwrap();
        assert_eq!(credential.key, "ek_live");
        assert_eq!(live.playback.attached_track(), None);
        assert!(live.mic_frames.try_recv().is_err());
    }
}
