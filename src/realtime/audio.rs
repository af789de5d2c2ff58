//! Local audio devices: microphone capture through cpal and coach speech
//! playback through rodio.
//!
//! Both device handles are `!Send` on some platforms, so each one lives on
//! its own thread and is driven over a channel. Captured audio is forwarded
//! as [`AudioFrame`]s to the frame sink the host's [`RtcEngine`] reads from;
//! the engine pushes decoded remote audio back through
//! [`RodioPlayback::push_frame`].
//!
//! [`RtcEngine`]: super::transport::RtcEngine

use crate::error::MediaAccessError;
use crate::realtime::transport::{
    AudioConstraints, AudioFrame, AudioTrack, LocalAudioStream, MediaDevices, PlaybackSink,
    RemoteTrack,
};
use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, Sample, SampleFormat, SizedSample};
use log::{debug, error, info, warn};
use rodio::buffer::SamplesBuffer;
use rodio::{OutputStream, Sink};
use std::sync::mpsc as std_mpsc;
use std::sync::Mutex;
use std::thread;
use tokio::sync::{mpsc, oneshot};

pub type FrameSink = mpsc::UnboundedSender<AudioFrame>;

/// Map a cpal stream build failure onto the media error taxonomy.
pub fn media_error_from_build(err: cpal::BuildStreamError) -> MediaAccessError {
    match err {
        cpal::BuildStreamError::DeviceNotAvailable => MediaAccessError::NoDevice,
        other => MediaAccessError::Device(other.to_string()),
    }
}

/// Default-input microphone via cpal.
#[derive(Default)]
pub struct CpalMedia {
    frames: Option<FrameSink>,
}

impl CpalMedia {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forward every captured buffer to `frames`.
    pub fn with_frame_sink(frames: FrameSink) -> Self {
        Self {
            frames: Some(frames),
        }
    }
}

struct CpalStream {
    track_id: String,
    stop_tx: Option<std_mpsc::Sender<()>>,
}

impl LocalAudioStream for CpalStream {
    fn tracks(&self) -> Vec<AudioTrack> {
        vec![AudioTrack {
            id: self.track_id.clone(),
        }]
    }

    fn stop(&mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
            debug!("Microphone capture {} stopped", self.track_id);
        }
    }
}

impl Drop for CpalStream {
    fn drop(&mut self) {
        self.stop();
    }
}

fn build_capture<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    frames: Option<FrameSink>,
) -> Result<cpal::Stream, MediaAccessError>
where
    T: SizedSample,
    f32: FromSample<T>,
{
    let channels = config.channels;
    let sample_rate = config.sample_rate.0;
    device
        .build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                if let Some(frames) = &frames {
                    let _ = frames.send(AudioFrame {
                        samples: data.iter().map(|&s| f32::from_sample(s)).collect(),
                        channels,
                        sample_rate,
                    });
                }
            },
            |err| error!("Microphone stream error: {}", err),
            None,
        )
        .map_err(media_error_from_build)
}

/// Runs on the capture thread. Reports readiness, then holds the stream
/// until told to stop.
fn run_capture(
    constraints: AudioConstraints,
    frames: Option<FrameSink>,
    ready: oneshot::Sender<Result<(), MediaAccessError>>,
    stop_rx: std_mpsc::Receiver<()>,
) {
    let opened = (|| -> Result<cpal::Stream, MediaAccessError> {
        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or(MediaAccessError::NoDevice)?;
        let supported = device
            .default_input_config()
            .map_err(|e| MediaAccessError::Device(e.to_string()))?;

        if supported.sample_rate().0 != constraints.sample_rate {
            debug!(
                "Microphone runs at {} Hz, requested {} Hz",
                supported.sample_rate().0,
                constraints.sample_rate
            );
        }
        let format = supported.sample_format();
        let config: cpal::StreamConfig = supported.into();

        let stream = match format {
            SampleFormat::I16 => build_capture::<i16>(&device, &config, frames),
            SampleFormat::U16 => build_capture::<u16>(&device, &config, frames),
            _ => build_capture::<f32>(&device, &config, frames),
        }?;
        stream
            .play()
            .map_err(|e| MediaAccessError::Device(e.to_string()))?;
        Ok(stream)
    })();

    match opened {
        Ok(stream) => {
            if ready.send(Ok(())).is_err() {
                return;
            }
            // Blocks until stop() or the handle is dropped.
            let _ = stop_rx.recv();
            drop(stream);
        }
        Err(e) => {
            let _ = ready.send(Err(e));
        }
    }
}

#[async_trait]
impl MediaDevices for CpalMedia {
    async fn get_user_audio(
        &self,
        constraints: &AudioConstraints,
    ) -> Result<Box<dyn LocalAudioStream>, MediaAccessError> {
        if constraints.echo_cancellation || constraints.noise_suppression {
            debug!("Echo cancellation and noise suppression are left to the RTC engine");
        }

        let (ready_tx, ready_rx) = oneshot::channel();
        let (stop_tx, stop_rx) = std_mpsc::channel();
        let constraints = constraints.clone();
        let frames = self.frames.clone();

        thread::Builder::new()
            .name("micropitch-mic".to_string())
            .spawn(move || run_capture(constraints, frames, ready_tx, stop_rx))
            .map_err(|e| MediaAccessError::Device(e.to_string()))?;

        match ready_rx.await {
            Ok(Ok(())) => {
                let track_id = format!("mic-{}", uuid::Uuid::new_v4());
                info!("Microphone capture {} started", track_id);
                Ok(Box::new(CpalStream {
                    track_id,
                    stop_tx: Some(stop_tx),
                }))
            }
            Ok(Err(e)) => {
                warn!("Microphone unavailable: {}", e);
                Err(e)
            }
            Err(_) => Err(MediaAccessError::Device(
                "capture thread exited before reporting".to_string(),
            )),
        }
    }
}

enum PlaybackCommand {
    Frame(AudioFrame),
    Stop,
}

struct PlaybackWorker {
    track_id: String,
    commands: std_mpsc::Sender<PlaybackCommand>,
}

/// Plays the coach's remote track on the default output device.
pub struct RodioPlayback {
    volume: f32,
    worker: Mutex<Option<PlaybackWorker>>,
}

impl Default for RodioPlayback {
    fn default() -> Self {
        Self::new(1.0)
    }
}

impl RodioPlayback {
    pub fn new(volume: f32) -> Self {
        Self {
            volume: volume.clamp(0.0, 1.0),
            worker: Mutex::new(None),
        }
    }

    pub fn attached_track(&self) -> Option<String> {
        self.worker
            .lock()
            .unwrap()
            .as_ref()
            .map(|w| w.track_id.clone())
    }

    /// Queue decoded remote audio. Returns false when no track is attached
    /// or the output device could not be opened.
    pub fn push_frame(&self, frame: AudioFrame) -> bool {
        match self.worker.lock().unwrap().as_ref() {
            Some(worker) => worker.commands.send(PlaybackCommand::Frame(frame)).is_ok(),
            None => false,
        }
    }
}

fn run_playback(volume: f32, commands: std_mpsc::Receiver<PlaybackCommand>) {
    let (_stream, stream_handle) = match OutputStream::try_default() {
        Ok(output) => output,
        Err(e) => {
            error!("Failed to open default output device: {}", e);
            return;
        }
    };
    let sink = match Sink::try_new(&stream_handle) {
        Ok(sink) => sink,
        Err(e) => {
            error!("Failed to create playback sink: {}", e);
            return;
        }
    };
    sink.set_volume(volume);

    while let Ok(command) = commands.recv() {
        match command {
            PlaybackCommand::Frame(frame) => {
                sink.append(SamplesBuffer::new(
                    frame.channels,
                    frame.sample_rate,
                    frame.samples,
                ));
            }
            PlaybackCommand::Stop => break,
        }
    }
    sink.stop();
}

impl PlaybackSink for RodioPlayback {
    fn attach(&self, track: &RemoteTrack) {
        let (commands, rx) = std_mpsc::channel();
        let volume = self.volume;
        let spawned = thread::Builder::new()
            .name("micropitch-playback".to_string())
            .spawn(move || run_playback(volume, rx));
        if let Err(e) = spawned {
            error!("Failed to start playback thread: {}", e);
            return;
        }

        let previous = self.worker.lock().unwrap().replace(PlaybackWorker {
            track_id: track.id.clone(),
            commands,
        });
        if let Some(previous) = previous {
            let _ = previous.commands.send(PlaybackCommand::Stop);
        }
        info!("Coach audio track {} attached to output", track.id);
    }

    fn detach(&self) {
        if let Some(worker) = self.worker.lock().unwrap().take() {
            let _ = worker.commands.send(PlaybackCommand::Stop);
            debug!("Coach audio track {} detached", worker.track_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame() -> AudioFrame {
        AudioFrame {
            samples: vec![0.0; 480],
            channels: 1,
            sample_rate: 24_000,
        }
    }

    #[test]
    fn test_build_errors_map_to_media_errors() {
        assert_eq!(
            media_error_from_build(cpal::BuildStreamError::DeviceNotAvailable),
            MediaAccessError::NoDevice
        );
        assert!(matches!(
            media_error_from_build(cpal::BuildStreamError::StreamConfigNotSupported),
            MediaAccessError::Device(_)
        ));
    }

    #[test]
    fn test_frames_before_attach_are_dropped() {
        let playback = RodioPlayback::default();
        assert_eq!(playback.attached_track(), None);
        assert!(!playback.push_frame(frame()));
        playback.detach();
        assert_eq!(playback.attached_track(), None);
    }

    #[test]
    fn test_attach_tracks_current_remote_track() {
        let playback = RodioPlayback::new(3.0);
        assert_eq!(playback.volume, 1.0);

        playback.attach(&RemoteTrack {
            id: "coach-1".into(),
            stream_id: None,
        });
        assert_eq!(playback.attached_track().as_deref(), Some("coach-1"));

        playback.attach(&RemoteTrack {
            id: "coach-2".into(),
            stream_id: Some("s".into()),
        });
        assert_eq!(playback.attached_track().as_deref(), Some("coach-2"));

        playback.detach();
        assert_eq!(playback.attached_track(), None);
        assert!(!playback.push_frame(frame()));
    }

    #[test]
    fn test_stream_stop_is_idempotent() {
        let (stop_tx, stop_rx) = std_mpsc::channel();
        let mut stream = CpalStream {
            track_id: "mic-test".into(),
            stop_tx: Some(stop_tx),
        };
        assert_eq!(stream.tracks()[0].id, "mic-test");
        stream.stop();
        stream.stop();
        assert_eq!(stop_rx.try_iter().count(), 1);
    }
}
