use crate::config::CropConfig;
use crate::detector::Detection;
use opencv::{
    core::{Mat, Rect, Size},
    imgproc,
    prelude::*,
};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("Detection {0:?} lies outside the frame")]
    OutOfFrame(Rect),
    #[error("OpenCV error: {0}")]
    OpenCvError(#[from] opencv::Error),
}

/// Crops the plate region with symmetric padding so characters at the plate
/// edges are not clipped, then upscales to the legibility floor if needed.
/// The returned crop owns its pixels; the source frame can be reused by the
/// next capture immediately.
pub fn crop_plate(
    frame: &Mat,
    detection: &Detection,
    config: &CropConfig,
) -> Result<Mat, ExtractError> {
    let frame_width = frame.cols();
    let frame_height = frame.rows();

    let pad_x = (detection.width() * config.padding_ratio) as i32;
    let pad_y = (detection.height() * config.padding_ratio) as i32;

    let x1 = (detection.x1 as i32 - pad_x).max(0);
    let y1 = (detection.y1 as i32 - pad_y).max(0);
    let x2 = (detection.x2 as i32 + pad_x).min(frame_width);
    let y2 = (detection.y2 as i32 + pad_y).min(frame_height);

    let roi = Rect::new(x1, y1, x2 - x1, y2 - y1);
    if roi.width <= 0 || roi.height <= 0 {
        return Err(ExtractError::OutOfFrame(roi));
    }

    let cropped = Mat::roi(frame, roi)?.try_clone()?;

    if cropped.rows() >= config.min_height && cropped.cols() >= config.min_width {
        return Ok(cropped);
    }

    // Below the legibility floor: upscale isotropically by the larger of the
    // two required factors.
    let scale = f64::max(
        config.min_height as f64 / cropped.rows() as f64,
        config.min_width as f64 / cropped.cols() as f64,
    );
    let new_width = (cropped.cols() as f64 * scale).ceil() as i32;
    let new_height = (cropped.rows() as f64 * scale).ceil() as i32;

    let mut upscaled = Mat::default();
    imgproc::resize(
        &cropped,
        &mut upscaled,
        Size::new(new_width, new_height),
        0.0,
        0.0,
        imgproc::INTER_CUBIC,
    )?;

    tracing::debug!(new_width, new_height, "upscaled plate crop to legibility floor");

    Ok(upscaled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use opencv::core::{Scalar, CV_8UC3};

    fn frame(width: i32, height: i32) -> Mat {
        Mat::new_rows_cols_with_default(height, width, CV_8UC3, Scalar::all(127.0)).unwrap()
    }

    fn config() -> CropConfig {
        CropConfig {
            padding_ratio: 0.15,
            min_width: 100,
            min_height: 32,
        }
    }

    fn detection(x1: f32, y1: f32, x2: f32, y2: f32) -> Detection {
        Detection {
            x1,
            y1,
            x2,
            y2,
            confidence: 0.9,
        }
    }

    #[test]
    fn crop_includes_padding() {
        let crop = crop_plate(
            &frame(640, 480),
            &detection(100.0, 100.0, 300.0, 140.0),
            &config(),
        )
        .unwrap();

        // 200x40 box padded by 15% per side: 260x52.
        assert_eq!(crop.cols(), 260);
        assert_eq!(crop.rows(), 52);
    }

    #[test]
    fn padding_is_clamped_to_frame_bounds() {
        let crop = crop_plate(
            &frame(640, 480),
            &detection(0.0, 0.0, 200.0, 40.0),
            &config(),
        )
        .unwrap();

        assert_eq!(crop.cols(), 230);
        assert_eq!(crop.rows(), 46);
    }

    #[test]
    fn small_crops_are_upscaled_to_legibility_floor() {
        let crop = crop_plate(
            &frame(640, 480),
            &detection(10.0, 10.0, 70.0, 22.0),
            &config(),
        )
        .unwrap();

        assert!(crop.cols() >= 100);
        assert!(crop.rows() >= 32);
    }

    #[test]
    fn tiny_detection_still_meets_floor() {
        let crop = crop_plate(
            &frame(640, 480),
            &detection(5.0, 5.0, 15.0, 8.0),
            &config(),
        )
        .unwrap();

        assert!(crop.cols() >= 100);
        assert!(crop.rows() >= 32);
    }

    #[test]
    fn detection_outside_frame_is_an_error() {
        let result = crop_plate(
            &frame(640, 480),
            &detection(700.0, 500.0, 800.0, 520.0),
            &config(),
        );
        assert!(result.is_err());
    }
}
