#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use image::{GrayImage, Luma};
use tokio::sync::Notify;

use checkin_console::{
    core::{
        event::Event,
        participant::{AttendanceResult, Participant},
    },
    error::ApiError,
    integrations::{api::ConsoleApi, feedback::FeedbackSink},
    render::raster::qr_modules,
};

/// In-memory stand-in for the remote API.
#[derive(Default)]
pub struct MemoryApi {
    pub events: Vec<Event>,
    pub participants: Vec<Participant>,
    /// When set, attendance writes are rejected with this message
    pub attendance_error: Mutex<Option<String>>,
    pub writes: Mutex<Vec<(String, String)>>,
    /// When set, summary reads wait for a permit
    pub summary_gate: Option<Arc<Notify>>,
}

impl MemoryApi {
    pub fn writes(&self) -> Vec<(String, String)> {
        self.writes.lock().unwrap().clone()
    }
}

#[async_trait]
impl ConsoleApi for MemoryApi {
    async fn create_attendance(&self, participant_id: &str, event_id: &str) -> Result<(), ApiError> {
        self.writes
            .lock()
            .unwrap()
            .push((participant_id.to_owned(), event_id.to_owned()));

        let rejection = self.attendance_error.lock().unwrap().clone();
        match rejection {
            Some(message) => Err(ApiError::Rejected { status: 400, message }),
            None => Ok(()),
        }
    }

    async fn attendance_summary(&self, participant_id: &str) -> Result<AttendanceResult, ApiError> {
        if let Some(gate) = &self.summary_gate {
            gate.notified().await;
        }

        self.participants
            .iter()
            .find(|p| p.id.as_deref() == Some(participant_id))
            .map(|p| AttendanceResult {
                full_name: p.name.clone(),
                nickname: p.nickname.clone(),
                time_in: Some("08:00".to_owned()),
                time_out: None,
            })
            .ok_or_else(|| ApiError::NotFound("Participant not found".to_owned()))
    }

    async fn active_events(&self) -> Result<Vec<Event>, ApiError> {
        Ok(self.events.clone())
    }

    async fn participants(&self) -> Result<Vec<Participant>, ApiError> {
        Ok(self.participants.clone())
    }

    async fn participant(&self, participant_id: &str) -> Result<Participant, ApiError> {
        self.participants
            .iter()
            .find(|p| p.id.as_deref() == Some(participant_id))
            .cloned()
            .ok_or_else(|| ApiError::NotFound("Participant not found".to_owned()))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Cue {
    Tone,
    Speech(String),
    Cancel,
}

/// Feedback sink that remembers every cue.
#[derive(Default, Clone)]
pub struct RecordingSink {
    pub cues: Arc<Mutex<Vec<Cue>>>,
}

impl RecordingSink {
    pub fn cues(&self) -> Vec<Cue> {
        self.cues.lock().unwrap().clone()
    }

    pub fn spoken(&self) -> Vec<String> {
        self.cues()
            .into_iter()
            .filter_map(|c| match c {
                Cue::Speech(text) => Some(text),
                _ => None,
            })
            .collect()
    }
}

impl FeedbackSink for RecordingSink {
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

/// A camera frame showing `payload` as a QR code.
pub fn qr_frame(payload: &str) -> GrayImage {
    let (width, modules) = qr_modules(payload).unwrap();
    let scale = 6;
    let quiet = 4;
    let side = ((width + 2 * quiet) * scale) as u32;

    GrayImage::from_fn(side, side, |x, y| {
        let mx = (x as usize / scale).checked_sub(quiet);
        let my = (y as usize / scale).checked_sub(quiet);
        match (mx, my) {
            (Some(mx), Some(my)) if mx < width && my < width && modules[my * width + mx] => {
                Luma([0])
            }
            _ => Luma([255]),
        }
    })
}
