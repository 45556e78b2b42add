use std::{
    collections::VecDeque,
    process::{Child, Command, Stdio},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Condvar, Mutex,
    },
    time::Duration,
};

use crate::core::settings::Settings;

/// Check-in tone: square wave
pub const TONE_FREQUENCY_HZ: f32 = 800.0;
pub const TONE_GAIN: f32 = 0.2;
pub const TONE_DURATION: Duration = Duration::from_millis(150);

/// Audible operator feedback for the scanning kiosk.
pub trait FeedbackSink: Send + Sync {
    fn play_tone(&self);
    fn speak(&self, text: &str);
    /// Silences any pending or ongoing speech
    fn cancel(&self);
}

/// Feedback sink that does nothing, for headless runs.
#[derive(Debug, Default, Clone, Copy)]
pub struct SilentFeedback;

impl FeedbackSink for SilentFeedback {
    fn play_tone(&self) {}
    fn speak(&self, text: &str) {
        log::debug!("(silent) {}", text);
    }
    fn cancel(&self) {}
}

/// Samples of one tone at `sample_rate`, interleaved for `channels`.
pub fn tone_samples(sample_rate: u32, channels: usize) -> Vec<f32> {
    let frames = (sample_rate as f64 * TONE_DURATION.as_secs_f64()) as usize;
    let period = sample_rate as f32 / TONE_FREQUENCY_HZ;

    (0..frames)
        .flat_map(|i| {
            let phase = (i as f32 % period) / period;
            let value = if phase < 0.5 { TONE_GAIN } else { -TONE_GAIN };
            std::iter::repeat(value).take(channels)
        })
        .collect()
}

/// Utterances waiting for the speech worker, plus the one being spoken.
#[derive(Default)]
struct SpeechQueue {
    pending: Mutex<VecDeque<Vec<String>>>,
    ready: Condvar,
    current: Mutex<Option<Child>>,
    closed: AtomicBool,
}

impl SpeechQueue {
    fn push(&self, args: Vec<String>) {
        if let Ok(mut pending) = self.pending.lock() {
            pending.push_back(args);
            self.ready.notify_one();
        }
    }

    /// Blocks until an utterance is queued; `None` once closed.
    fn next(&self) -> Option<Vec<String>> {
        let mut pending = self.pending.lock().ok()?;
        loop {
            if self.closed.load(Ordering::SeqCst) {
                return None;
            }
            if let Some(args) = pending.pop_front() {
                return Some(args);
            }
            pending = self.ready.wait(pending).ok()?;
        }
    }

    fn cancel(&self) {
        if let Ok(mut pending) = self.pending.lock() {
            pending.clear();
        }
        if let Some(mut child) = self.current.lock().ok().and_then(|mut c| c.take()) {
            let _ = child.kill();
            let _ = child.wait();
        }
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.ready.notify_all();
        self.cancel();
    }

    /// Runs queued utterances one at a time until closed.
    fn run(&self, command: &str) {
        while let Some(args) = self.next() {
            let child = Command::new(command)
                .args(args)
                .stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .spawn();
            match child {
                Ok(child) => {
                    if let Ok(mut current) = self.current.lock() {
                        *current = Some(child);
                    }
                    self.wait_current();
                }
                Err(e) => log::warn!("Failed to run {}: {}", command, e),
            }
        }
        log::debug!("Speech worker stopped");
    }

    /// Polls so `cancel` can take and kill the child meanwhile.
    fn wait_current(&self) {
        loop {
            std::thread::sleep(SPEECH_POLL);
            let Ok(mut current) = self.current.lock() else {
                return;
            };
            let finished = match current.as_mut() {
                None => true,
                Some(child) => !matches!(child.try_wait(), Ok(None)),
            };
            if finished {
                *current = None;
                return;
            }
        }
    }
}

const SPEECH_POLL: Duration = Duration::from_millis(20);

/// Speaks through an external text-to-speech program and plays the tone
/// on the default output device. Utterances queue up and never overlap.
pub struct SpeakerFeedback {
    rate: f32,
    pitch: f32,
    speech: Arc<SpeechQueue>,
    #[cfg(feature = "speaker")]
    tone: Option<speaker::ToneOutput>,
}

impl SpeakerFeedback {
    pub fn new(settings: &Settings) -> Self {
        #[cfg(feature = "speaker")]
        let tone = match speaker::ToneOutput::open() {
            Ok(tone) => Some(tone),
            Err(e) => {
                log::warn!("No audio output, check-in tone disabled: {:#}", e);
                None
            }
        };

        let speech = Arc::new(SpeechQueue::default());
        let worker = speech.clone();
        let command = settings.speech_command.clone();
        if let Err(e) = std::thread::Builder::new()
            .name("speech".to_owned())
            .spawn(move || worker.run(&command))
        {
            log::warn!("Speech disabled, failed to start worker: {}", e);
            speech.closed.store(true, Ordering::SeqCst);
        }

        Self {
            rate: settings.speech_rate,
            pitch: settings.speech_pitch,
            speech,
            #[cfg(feature = "speaker")]
            tone,
        }
    }

    /// espeak-style arguments: words per minute and pitch on a 0-99 scale
    fn speech_args(&self, text: &str) -> Vec<String> {
        let words_per_minute = (175.0 * self.rate).round() as u32;
        let pitch = (50.0 * self.pitch).round().clamp(0.0, 99.0) as u32;
        vec![
            "-s".to_owned(),
            words_per_minute.to_string(),
            "-p".to_owned(),
            pitch.to_string(),
            text.to_owned(),
        ]
    }
}

impl FeedbackSink for SpeakerFeedback {
    fn play_tone(&self) {
        #[cfg(feature = "speaker")]
        if let Some(tone) = &self.tone {
            tone.play();
        }
    }

    fn speak(&self, text: &str) {
        self.speech.push(self.speech_args(text));
    }

    fn cancel(&self) {
        self.speech.cancel();
    }
}

impl Drop for SpeakerFeedback {
    fn drop(&mut self) {
        self.speech.close();
    }
}

#[cfg(feature = "speaker")]
mod speaker {
    use std::sync::{Arc, Mutex};

    use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
    use ringbuf::{
        traits::{Consumer, Producer, Split},
        HeapProd, HeapRb,
    };

    /// Output stream fed from a ring buffer; silence when the buffer is empty.
    pub struct ToneOutput {
        producer: Mutex<HeapProd<f32>>,
        samples: Arc<Vec<f32>>,
    }

    impl ToneOutput {
        pub fn open() -> anyhow::Result<Self> {
            let host = cpal::default_host();
            let device = host
                .default_output_device()
                .ok_or(anyhow::anyhow!("No default output device found."))?;
            let config = device.default_output_config()?;
            let sample_rate = config.sample_rate().0;
            let channels = config.channels() as usize;

            log::info!(
                "Tone output on {}: {} channels, {}Hz",
                device.name().unwrap_or_default(),
                channels,
                sample_rate
            );

            let samples = super::tone_samples(sample_rate, channels);
            let ring = HeapRb::<f32>::new(samples.len() * 4);
            let (producer, mut consumer) = ring.split();

            let output_fn = move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                for sample in data {
                    *sample = consumer.try_pop().unwrap_or(0.0);
                }
            };

            let stream = device.build_output_stream(
                &config.into(),
                output_fn,
                move |err| log::error!("an error occurred on stream: {}", err),
                None,
            )?;
            stream.play()?;

            // cpal streams are not Send; keep it alive for the process lifetime
            std::mem::forget(stream);

            Ok(Self {
                producer: Mutex::new(producer),
                samples: Arc::new(samples),
            })
        }

        pub fn play(&self) {
            if let Ok(mut producer) = self.producer.lock() {
                producer.push_slice(&self.samples);
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// What a sink was asked to do, in order.
    #[derive(Debug, Clone, PartialEq)]
    pub enum Cue {
        Tone,
        Speech(String),
        Cancel,
    }

    #[derive(Default, Clone)]
    pub struct RecordingFeedback {
        pub cues: Arc<Mutex<Vec<Cue>>>,
    }

    impl FeedbackSink for RecordingFeedback {
        fn play_tone(&self) {
            self.cues.lock().unwrap().push(Cue::Tone);
        }
        fn speak(&self, text: &str) {
            self.cues.lock().unwrap().push(Cue::Speech(text.to_owned()));
        }
        fn cancel(&self) {
            self.cues.lock().unwrap().push(Cue::Cancel);
        }
    }

    #[test]
    fn test_tone_samples() {
        let samples = tone_samples(48_000, 2);
        // 150ms of stereo
        assert_eq!(samples.len(), 7_200 * 2);
        assert!(samples.iter().all(|s| s.abs() == TONE_GAIN));
        // 60 samples per period at 800Hz, first half high
        assert_eq!(samples[0], TONE_GAIN);
        assert_eq!(samples[2 * 30], -TONE_GAIN);
        assert_eq!(samples[2 * 60], TONE_GAIN);
    }

    #[test]
    fn test_speech_args() {
        let feedback = SpeakerFeedback::new(&Settings::default());
        let args = feedback.speech_args("Your ID has been scanned, Mia");
        assert_eq!(args, vec!["-s", "166", "-p", "60", "Your ID has been scanned, Mia"]);
    }

    #[test]
    fn test_missing_speech_command() {
        let feedback = SpeakerFeedback::new(&Settings {
            speech_command: "definitely-not-a-tts-binary".to_owned(),
            ..Settings::default()
        });
        feedback.speak("hello");
        feedback.cancel();
    }

    #[cfg(unix)]
    fn logging_tts(dir: &std::path::Path) -> (Settings, std::path::PathBuf) {
        use std::os::unix::fs::PermissionsExt;

        let log = dir.join("spoken.log");
        let script = dir.join("tts.sh");
        std::fs::write(
            &script,
            format!(
                "#!/bin/sh\necho \"start $5\" >> {log}\nsleep 0.2\necho \"end $5\" >> {log}\n",
                log = log.display()
            ),
        )
        .unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let settings = Settings {
            speech_command: script.display().to_string(),
            ..Settings::default()
        };
        (settings, log)
    }

    #[cfg(unix)]
    fn read_lines(path: &std::path::Path) -> Vec<String> {
        std::fs::read_to_string(path)
            .unwrap_or_default()
            .lines()
            .map(str::to_owned)
            .collect()
    }

    #[cfg(unix)]
    fn wait_for_lines(path: &std::path::Path, count: usize) -> Vec<String> {
        let deadline = std::time::Instant::now() + Duration::from_secs(10);
        while read_lines(path).len() < count && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }
        read_lines(path)
    }

    #[cfg(unix)]
    #[test]
    fn test_utterances_do_not_overlap() {
        let dir = tempfile::tempdir().unwrap();
        let (settings, log) = logging_tts(dir.path());
        let feedback = SpeakerFeedback::new(&settings);

        feedback.speak("one");
        feedback.speak("two");

        assert_eq!(
            wait_for_lines(&log, 4),
            vec!["start one", "end one", "start two", "end two"]
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_cancel_drops_queued_speech() {
        let dir = tempfile::tempdir().unwrap();
        let (settings, log) = logging_tts(dir.path());
        let feedback = SpeakerFeedback::new(&settings);

        feedback.speak("one");
        assert_eq!(wait_for_lines(&log, 1), vec!["start one"]);
        feedback.speak("two");
        feedback.cancel();

        std::thread::sleep(Duration::from_millis(600));
        assert!(!read_lines(&log).iter().any(|l| l == "start two"));
    }
}
