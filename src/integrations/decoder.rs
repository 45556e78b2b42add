use std::{
    sync::mpsc::{self, RecvTimeoutError, TryRecvError},
    thread::JoinHandle,
    time::Duration,
};

use image::GrayImage;

use crate::error::DecoderError;

use super::camera::{CameraDevice, CameraLease};

/// Decodes every QR code found in a frame.
pub fn decode_frame(frame: &GrayImage) -> Vec<String> {
    let (width, height) = frame.dimensions();
    let mut prepared = rqrr::PreparedImage::prepare_from_greyscale(
        width as usize,
        height as usize,
        |x, y| frame.get_pixel(x as u32, y as u32).0[0],
    );

    prepared
        .detect_grids()
        .into_iter()
        .filter_map(|grid| match grid.decode() {
            Ok((_, content)) => Some(content),
            Err(e) => {
                log::debug!("Unreadable QR grid: {:?}", e);
                None
            }
        })
        .collect()
}

/// Consecutive unreadable frames after which the camera counts as lost.
pub const MAX_FRAME_ERRORS: u32 = 20;

/// Camera-driven decode loop on a dedicated thread.
///
/// The handler runs on the decode thread, once per decoded payload, before
/// the next frame is grabbed. The camera is released when the loop exits,
/// whether through `stop`, drop, a lost camera, or a panicking handler.
///
/// A lost camera (`CameraUnavailable` from `grab`, or `MAX_FRAME_ERRORS`
/// unreadable frames in a row) ends the loop. The camera is released first,
/// then `on_fault` receives the error.
pub struct ContinuousDecoder {
    stop_tx: Option<mpsc::Sender<()>>,
    worker: Option<JoinHandle<()>>,
}

impl ContinuousDecoder {
    pub fn start<C, F, E>(
        camera: C,
        frame_interval: Duration,
        mut handler: F,
        on_fault: E,
    ) -> Result<Self, DecoderError>
    where
        C: CameraDevice,
        F: FnMut(String) + Send + 'static,
        E: FnOnce(DecoderError) + Send + 'static,
    {
        let mut lease = CameraLease::acquire(camera)?;
        let (stop_tx, stop_rx) = mpsc::channel::<()>();

        let worker = std::thread::Builder::new()
            .name("qr-decoder".to_owned())
            .spawn(move || {
                let mut frame_errors = 0;
                let fault = loop {
                    match stop_rx.try_recv() {
                        Err(TryRecvError::Empty) => {}
                        _ => break None,
                    }

                    let idle = match lease.grab() {
                        Ok(Some(frame)) => {
                            frame_errors = 0;
                            for payload in decode_frame(&frame) {
                                handler(payload);
                            }
                            false
                        }
                        Ok(None) => {
                            frame_errors = 0;
                            true
                        }
                        Err(e @ DecoderError::CameraUnavailable(_)) => break Some(e),
                        Err(e) => {
                            frame_errors += 1;
                            log::warn!("{}", e);
                            if frame_errors >= MAX_FRAME_ERRORS {
                                break Some(DecoderError::CameraUnavailable(format!(
                                    "{} unreadable frames in a row, last: {}",
                                    frame_errors, e
                                )));
                            }
                            true
                        }
                    };

                    if idle {
                        match stop_rx.recv_timeout(frame_interval) {
                            Err(RecvTimeoutError::Timeout) => {}
                            _ => break None,
                        }
                    }
                };

                drop(lease);
                match fault {
                    Some(e) => {
                        log::error!("Camera lost: {}", e);
                        on_fault(e);
                    }
                    None => log::debug!("Decode loop stopped"),
                }
            })
            .map_err(|e| DecoderError::CameraUnavailable(format!("Failed to start decoder: {}", e)))?;

        Ok(Self {
            stop_tx: Some(stop_tx),
            worker: Some(worker),
        })
    }

    pub fn is_running(&self) -> bool {
        self.worker.as_ref().is_some_and(|w| !w.is_finished())
    }

    /// Halts decoding and releases the camera. Safe to call repeatedly.
    pub fn stop(&mut self) {
        drop(self.stop_tx.take());
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                log::error!("Decode loop panicked");
            }
        }
    }
}

impl Drop for ContinuousDecoder {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::{Arc, Mutex};

    use image::Luma;

    use super::*;
    use crate::{
        integrations::camera::{MemoryCamera, SpoolCamera},
        render::raster::qr_modules,
    };

    /// Renders `payload` as a black-on-white QR frame with a quiet zone.
    pub(crate) fn qr_frame(payload: &str) -> GrayImage {
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

    #[test]
    fn test_decode_frame() {
        assert_eq!(decode_frame(&qr_frame("P123")), vec!["P123".to_owned()]);
        assert!(decode_frame(&GrayImage::from_pixel(64, 64, Luma([255]))).is_empty());
    }

    #[test]
    fn test_handler_receives_payloads_in_order() {
        let camera = MemoryCamera::new();
        camera.push_frame(qr_frame("P1"));
        camera.push_frame(GrayImage::from_pixel(32, 32, Luma([255])));
        camera.push_frame(qr_frame("P2"));

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let mut decoder = ContinuousDecoder::start(
            camera.clone(),
            Duration::from_millis(5),
            move |p| sink.lock().unwrap().push(p),
            |_| {},
        )
        .unwrap();

        let deadline = std::time::Instant::now() + Duration::from_secs(10);
        while seen.lock().unwrap().len() < 2 && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }

        decoder.stop();
        assert_eq!(*seen.lock().unwrap(), vec!["P1".to_owned(), "P2".to_owned()]);
        assert_eq!(camera.pending_frames(), 0);
    }

    #[test]
    fn test_stop_is_idempotent_and_releases() {
        let camera = MemoryCamera::new();
        let mut decoder =
            ContinuousDecoder::start(camera.clone(), Duration::from_millis(5), |_| {}, |_| {}).unwrap();
        assert!(decoder.is_running());

        decoder.stop();
        decoder.stop();
        assert!(!decoder.is_running());
        assert_eq!(camera.acquired(), 1);
        assert_eq!(camera.released(), 1);

        drop(decoder);
        assert_eq!(camera.released(), 1);
    }

    #[test]
    fn test_drop_releases_camera() {
        let camera = MemoryCamera::new();
        {
            let _decoder =
                ContinuousDecoder::start(camera.clone(), Duration::from_millis(5), |_| {}, |_| {}).unwrap();
        }
        assert_eq!(camera.released(), 1);
    }

    #[test]
    fn test_camera_unavailable() {
        let camera = MemoryCamera::unavailable("no camera");
        let result = ContinuousDecoder::start(camera.clone(), Duration::from_millis(5), |_| {}, |_| {});
        assert!(matches!(result, Err(DecoderError::CameraUnavailable(_))));
        assert_eq!(camera.released(), 0);
    }

    #[test]
    fn test_lost_camera_ends_loop() {
        let camera = MemoryCamera::new();
        let (fault_tx, fault_rx) = mpsc::channel();
        let mut decoder = ContinuousDecoder::start(
            camera.clone(),
            Duration::from_millis(5),
            |_| {},
            move |e| {
                let _ = fault_tx.send(e);
            },
        )
        .unwrap();

        camera.disconnect("unplugged");
        let fault = fault_rx.recv_timeout(Duration::from_secs(10)).unwrap();
        assert_eq!(fault, DecoderError::CameraUnavailable("unplugged".to_owned()));
        assert_eq!(camera.released(), 1);

        decoder.stop();
        assert!(!decoder.is_running());
        assert_eq!(camera.released(), 1);
    }

    #[test]
    fn test_repeated_bad_frames_end_loop() {
        let dir = tempfile::tempdir().unwrap();
        for i in 0..MAX_FRAME_ERRORS {
            std::fs::write(dir.path().join(format!("{:04}.png", i)), "garbage").unwrap();
        }

        let (fault_tx, fault_rx) = mpsc::channel();
        let _decoder = ContinuousDecoder::start(
            SpoolCamera::new(dir.path()),
            Duration::from_millis(1),
            |_| {},
            move |e| {
                let _ = fault_tx.send(e);
            },
        )
        .unwrap();

        let fault = fault_rx.recv_timeout(Duration::from_secs(10)).unwrap();
        assert!(matches!(fault, DecoderError::CameraUnavailable(_)));
    }
}
