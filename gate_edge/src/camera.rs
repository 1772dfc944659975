use crate::config::CameraConfig;
use opencv::{core::Mat, prelude::*, videoio};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CameraError {
    #[error("Failed to open camera {index}: {source}")]
    OpenCameraFailed { index: i32, source: opencv::Error },
    #[error("Camera {0} reported itself as not opened")]
    NotOpened(i32),
    #[error("Failed to read frame: {0}")]
    ReadFrameFailed(opencv::Error),
    #[error("OpenCV error: {0}")]
    OpenCvError(opencv::Error),
}

impl From<opencv::Error> for CameraError {
    fn from(err: opencv::Error) -> Self {
        CameraError::OpenCvError(err)
    }
}

/// Camera handle owned exclusively by the capture loop. Frames are read one
/// at a time and never shared across iterations.
#[derive(Debug)]
pub struct Camera {
    capture: videoio::VideoCapture,
    index: i32,
}

impl Camera {
    pub fn open(config: &CameraConfig) -> Result<Self, CameraError> {
        let mut capture = videoio::VideoCapture::new(config.index, videoio::CAP_ANY)
            .map_err(|source| CameraError::OpenCameraFailed {
                index: config.index,
                source,
            })?;

        if !capture.is_opened()? {
            return Err(CameraError::NotOpened(config.index));
        }

        capture.set(videoio::CAP_PROP_FRAME_WIDTH, config.width as f64)?;
        capture.set(videoio::CAP_PROP_FRAME_HEIGHT, config.height as f64)?;

        tracing::info!(
            index = config.index,
            width = config.width,
            height = config.height,
            "camera opened"
        );

        Ok(Self {
            capture,
            index: config.index,
        })
    }

    /// Reads the next frame. An empty frame is returned as-is; the caller
    /// decides whether to skip it.
    pub fn capture_frame(&mut self) -> Result<Mat, CameraError> {
        let mut frame = Mat::default();
        self.capture
            .read(&mut frame)
            .map_err(CameraError::ReadFrameFailed)?;
        Ok(frame)
    }

    pub fn index(&self) -> i32 {
        self.index
    }
}
