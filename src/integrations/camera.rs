use std::{
    collections::VecDeque,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
};

use image::GrayImage;

use crate::error::DecoderError;

/// A frame source the decoder can hold exclusively.
pub trait CameraDevice: Send + 'static {
    /// Opens the device. Fails with `CameraUnavailable` when it is missing or
    /// access is denied.
    fn acquire(&mut self) -> Result<(), DecoderError>;

    /// Next frame, `None` when no new frame is ready yet
    fn grab(&mut self) -> Result<Option<GrayImage>, DecoderError>;

    fn release(&mut self);

    fn name(&self) -> String;
}

/// An acquired camera; the device is released when the lease drops.
pub struct CameraLease<C: CameraDevice> {
    camera: C,
}

impl<C: CameraDevice> CameraLease<C> {
    pub fn acquire(mut camera: C) -> Result<Self, DecoderError> {
        camera.acquire()?;
        log::info!("Acquired camera {}", camera.name());
        Ok(Self { camera })
    }

    pub fn grab(&mut self) -> Result<Option<GrayImage>, DecoderError> {
        self.camera.grab()
    }
}

impl<C: CameraDevice> Drop for CameraLease<C> {
    fn drop(&mut self) {
        self.camera.release();
        log::info!("Released camera {}", self.camera.name());
    }
}

const FRAME_EXTENSIONS: [&str; 3] = ["png", "jpg", "jpeg"];

/// Camera backed by a spool directory that a capture process drops frame
/// images into. Frames are consumed oldest-name first and deleted once read.
pub struct SpoolCamera {
    dir: PathBuf,
}

impl SpoolCamera {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn next_frame_path(&self) -> Result<Option<PathBuf>, DecoderError> {
        let entries = std::fs::read_dir(&self.dir)
            .map_err(|e| DecoderError::CameraUnavailable(format!("{}: {}", self.dir.display(), e)))?;

        let mut frames: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.is_file() && is_frame(path))
            .collect();
        frames.sort();

        Ok(frames.into_iter().next())
    }
}

fn is_frame(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| FRAME_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
}

impl CameraDevice for SpoolCamera {
    fn acquire(&mut self) -> Result<(), DecoderError> {
        let metadata = std::fs::metadata(&self.dir)
            .map_err(|e| DecoderError::CameraUnavailable(format!("{}: {}", self.dir.display(), e)))?;
        if !metadata.is_dir() {
            return Err(DecoderError::CameraUnavailable(format!(
                "{} is not a directory",
                self.dir.display()
            )));
        }
        std::fs::read_dir(&self.dir)
            .map_err(|e| DecoderError::CameraUnavailable(format!("{}: {}", self.dir.display(), e)))?;
        Ok(())
    }

    fn grab(&mut self) -> Result<Option<GrayImage>, DecoderError> {
        let Some(path) = self.next_frame_path()? else {
            return Ok(None);
        };

        let frame = image::open(&path).map(|img| img.to_luma8());
        if let Err(e) = std::fs::remove_file(&path) {
            log::warn!("Failed to remove frame {}: {}", path.display(), e);
        }

        frame
            .map(Some)
            .map_err(|e| DecoderError::Frame(format!("{}: {}", path.display(), e)))
    }

    fn release(&mut self) {}

    fn name(&self) -> String {
        format!("spool:{}", self.dir.display())
    }
}

/// In-memory camera fed by the caller, counting acquire/release pairs.
#[derive(Clone, Default)]
pub struct MemoryCamera {
    frames: Arc<Mutex<VecDeque<GrayImage>>>,
    acquired: Arc<AtomicUsize>,
    released: Arc<AtomicUsize>,
    unavailable: Option<String>,
    lost: Arc<Mutex<Option<String>>>,
}

impl MemoryCamera {
    pub fn new() -> Self {
        Self::default()
    }

    /// A camera whose acquisition always fails with `reason`.
    pub fn unavailable(reason: &str) -> Self {
        Self {
            unavailable: Some(reason.to_owned()),
            ..Self::default()
        }
    }

    /// Makes every later `grab` fail with `CameraUnavailable(reason)`.
    pub fn disconnect(&self, reason: &str) {
        if let Ok(mut lost) = self.lost.lock() {
            *lost = Some(reason.to_owned());
        }
    }

    pub fn push_frame(&self, frame: GrayImage) {
        if let Ok(mut frames) = self.frames.lock() {
            frames.push_back(frame);
        }
    }

    pub fn pending_frames(&self) -> usize {
        self.frames.lock().map(|f| f.len()).unwrap_or_default()
    }

    pub fn acquired(&self) -> usize {
        self.acquired.load(Ordering::SeqCst)
    }

    pub fn released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }
}

impl CameraDevice for MemoryCamera {
    fn acquire(&mut self) -> Result<(), DecoderError> {
        if let Some(reason) = &self.unavailable {
            return Err(DecoderError::CameraUnavailable(reason.clone()));
        }
        self.acquired.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn grab(&mut self) -> Result<Option<GrayImage>, DecoderError> {
        if let Some(reason) = self.lost.lock().ok().and_then(|lost| lost.clone()) {
            return Err(DecoderError::CameraUnavailable(reason));
        }
        self.frames
            .lock()
            .map(|mut frames| frames.pop_front())
            .map_err(|_| DecoderError::Frame("frame queue poisoned".to_owned()))
    }

    fn release(&mut self) {
        self.released.fetch_add(1, Ordering::SeqCst);
    }

    fn name(&self) -> String {
        "memory".to_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lease_releases_on_drop() {
        let camera = MemoryCamera::new();
        {
            let _lease = CameraLease::acquire(camera.clone()).unwrap();
            assert_eq!(camera.acquired(), 1);
            assert_eq!(camera.released(), 0);
        }
        assert_eq!(camera.released(), 1);
    }

    #[test]
    fn test_unavailable_camera_is_not_released() {
        let camera = MemoryCamera::unavailable("permission denied");
        let err = CameraLease::acquire(camera.clone()).err().unwrap();
        assert_eq!(err, DecoderError::CameraUnavailable("permission denied".to_owned()));
        assert_eq!(camera.released(), 0);
    }

    #[test]
    fn test_spool_camera() {
        let dir = tempfile::tempdir().unwrap();
        let mut missing = SpoolCamera::new(dir.path().join("nope"));
        assert!(matches!(missing.acquire(), Err(DecoderError::CameraUnavailable(_))));

        let mut camera = SpoolCamera::new(dir.path());
        camera.acquire().unwrap();
        assert!(camera.grab().unwrap().is_none());

        GrayImage::from_pixel(4, 3, image::Luma([255]))
            .save(dir.path().join("0002.png"))
            .unwrap();
        GrayImage::from_pixel(2, 2, image::Luma([0]))
            .save(dir.path().join("0001.png"))
            .unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        assert_eq!(camera.grab().unwrap().unwrap().dimensions(), (2, 2));
        assert_eq!(camera.grab().unwrap().unwrap().dimensions(), (4, 3));
        assert!(camera.grab().unwrap().is_none());
        assert!(dir.path().join("notes.txt").exists());
    }

    #[test]
    fn test_spool_camera_lost_dir() {
        let dir = tempfile::tempdir().unwrap();
        let spool = dir.path().join("frames");
        std::fs::create_dir(&spool).unwrap();

        let mut camera = SpoolCamera::new(spool.clone());
        camera.acquire().unwrap();
        std::fs::remove_dir(&spool).unwrap();
        assert!(matches!(camera.grab(), Err(DecoderError::CameraUnavailable(_))));
    }

    #[test]
    fn test_spool_camera_bad_frame() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("0001.png"), "not a png").unwrap();

        let mut camera = SpoolCamera::new(dir.path());
        camera.acquire().unwrap();
        assert!(matches!(camera.grab(), Err(DecoderError::Frame(_))));
        // The broken frame is discarded, not retried forever
        assert!(camera.grab().unwrap().is_none());
    }
}
