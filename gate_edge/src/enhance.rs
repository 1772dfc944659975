use crate::config::EnhancementConfig;
use opencv::{
    core::{Mat, Point, Size, BORDER_DEFAULT},
    imgproc, photo,
    prelude::*,
};

// Non-local-means parameters, matched to the data the recognition model was
// trained on.
const DENOISE_STRENGTH: f32 = 10.0;
const DENOISE_TEMPLATE_WINDOW: i32 = 7;
const DENOISE_SEARCH_WINDOW: i32 = 21;

/// Deterministic enhancement pipeline preparing a plate crop for character
/// recognition: resize to the working height, grayscale, adaptive binarize,
/// denoise, sharpen, and expand back to three channels for the model input.
///
/// The stage order and the sharpen kernel are part of the contract with the
/// recognition service; reordering stages changes recognition accuracy.
pub fn prepare_for_ocr(plate: &Mat, config: &EnhancementConfig) -> Result<Mat, opencv::Error> {
    // 1. Resize up to the working height, preserving aspect ratio.
    let mut resized = Mat::default();
    if plate.rows() < config.target_height {
        let scale = config.target_height as f64 / plate.rows() as f64;
        let new_width = (plate.cols() as f64 * scale) as i32;
        imgproc::resize(
            plate,
            &mut resized,
            Size::new(new_width, config.target_height),
            0.0,
            0.0,
            imgproc::INTER_CUBIC,
        )?;
    } else {
        resized = plate.try_clone()?;
    }

    // 2. Single-channel luminance.
    let mut gray = Mat::default();
    imgproc::cvt_color_def(&resized, &mut gray, imgproc::COLOR_BGR2GRAY)?;

    // 3. Adaptive threshold handles uneven illumination across the plate.
    let mut binary = Mat::default();
    imgproc::adaptive_threshold(
        &gray,
        &mut binary,
        255.0,
        imgproc::ADAPTIVE_THRESH_GAUSSIAN_C,
        imgproc::THRESH_BINARY,
        config.threshold_window,
        config.threshold_bias,
    )?;

    // 4. Denoise.
    let mut denoised = Mat::default();
    photo::fast_nl_means_denoising(
        &binary,
        &mut denoised,
        DENOISE_STRENGTH,
        DENOISE_TEMPLATE_WINDOW,
        DENOISE_SEARCH_WINDOW,
    )?;

    // 5. Sharpen character edges.
    let kernel = Mat::from_slice_2d(&[
        [-1.0f32, -1.0, -1.0],
        [-1.0, 9.0, -1.0],
        [-1.0, -1.0, -1.0],
    ])?;
    let mut sharpened = Mat::default();
    imgproc::filter_2d(
        &denoised,
        &mut sharpened,
        -1,
        &kernel,
        Point::new(-1, -1),
        0.0,
        BORDER_DEFAULT,
    )?;

    // 6. Back to three channels for the recognition model input.
    let mut result = Mat::default();
    imgproc::cvt_color_def(&sharpened, &mut result, imgproc::COLOR_GRAY2BGR)?;

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use opencv::core::{Scalar, CV_8UC3};

    fn config() -> EnhancementConfig {
        EnhancementConfig {
            target_height: 64,
            threshold_window: 11,
            threshold_bias: 2.0,
        }
    }

    fn crop(width: i32, height: i32) -> Mat {
        Mat::new_rows_cols_with_default(height, width, CV_8UC3, Scalar::all(90.0)).unwrap()
    }

    #[test]
    fn output_meets_working_height_and_has_three_channels() {
        let result = prepare_for_ocr(&crop(120, 40), &config()).unwrap();

        assert_eq!(result.rows(), 64);
        assert_eq!(result.cols(), 180);
        assert_eq!(result.channels(), 3);
    }

    #[test]
    fn tall_crops_keep_their_size() {
        let result = prepare_for_ocr(&crop(300, 96), &config()).unwrap();

        assert_eq!(result.rows(), 96);
        assert_eq!(result.cols(), 300);
    }

    #[test]
    fn pipeline_is_deterministic() {
        let input = crop(150, 48);
        let first = prepare_for_ocr(&input, &config()).unwrap();
        let second = prepare_for_ocr(&input, &config()).unwrap();

        let diff = {
            let mut d = Mat::default();
            opencv::core::absdiff(&first, &second, &mut d).unwrap();
            opencv::core::sum_elems(&d).unwrap()
        };
        assert_eq!(diff[0], 0.0);
        assert_eq!(diff[1], 0.0);
        assert_eq!(diff[2], 0.0);
    }
}
