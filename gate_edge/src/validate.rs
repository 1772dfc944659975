use crate::config::ValidationConfig;
use crate::detector::Detection;

/// Geometric plausibility filter for raw detections. Plates are wide, flat
/// rectangles; anything outside the configured aspect band or below the
/// minimum size is a detector false positive and is skipped silently.
pub fn is_plausible_plate(config: &ValidationConfig, detection: &Detection) -> bool {
    let width = detection.width();
    let height = detection.height();

    if width <= 0.0 || height <= 0.0 {
        return false;
    }

    let aspect_ratio = width / height;
    if aspect_ratio < config.min_aspect_ratio || aspect_ratio > config.max_aspect_ratio {
        tracing::debug!(aspect_ratio, "rejected detection: aspect ratio out of band");
        return false;
    }

    if width < config.min_width || height < config.min_height {
        tracing::debug!(width, height, "rejected detection: below minimum size");
        return false;
    }

    true
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ValidationConfig {
        ValidationConfig {
            min_aspect_ratio: 3.5,
            max_aspect_ratio: 7.0,
            min_width: 50.0,
            min_height: 10.0,
        }
    }

    fn detection(width: f32, height: f32) -> Detection {
        Detection {
            x1: 10.0,
            y1: 10.0,
            x2: 10.0 + width,
            y2: 10.0 + height,
            confidence: 0.9,
        }
    }

    #[test]
    fn accepts_typical_plate_geometry() {
        assert!(is_plausible_plate(&config(), &detection(200.0, 40.0)));
    }

    #[test]
    fn aspect_ratio_bounds_are_inclusive() {
        assert!(is_plausible_plate(&config(), &detection(70.0, 20.0))); // 3.5
        assert!(is_plausible_plate(&config(), &detection(140.0, 20.0))); // 7.0
    }

    #[test]
    fn rejects_aspect_ratio_outside_band() {
        assert!(!is_plausible_plate(&config(), &detection(69.0, 20.0))); // 3.45
        assert!(!is_plausible_plate(&config(), &detection(150.0, 20.0))); // 7.5
        assert!(!is_plausible_plate(&config(), &detection(60.0, 60.0))); // square
    }

    #[test]
    fn rejects_degenerate_boxes() {
        assert!(!is_plausible_plate(&config(), &detection(0.0, 20.0)));
        assert!(!is_plausible_plate(&config(), &detection(-5.0, 20.0)));
        assert!(!is_plausible_plate(&config(), &detection(100.0, 0.0)));
    }

    #[test]
    fn rejects_below_minimum_size() {
        assert!(!is_plausible_plate(&config(), &detection(45.0, 9.0)));
        // Wide enough ratio but under the width floor.
        assert!(!is_plausible_plate(&config(), &detection(48.0, 12.0)));
    }
}
