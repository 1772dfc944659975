use crate::model_service::CharacterDetection;

/// The ordered plate string rebuilt from per-glyph detections.
#[derive(Debug, Clone, PartialEq)]
pub struct RecognitionResult {
    pub plate_text: String,
    pub confidence: f32,
    pub character_count: usize,
}

/// Rebuilds the plate text by reading glyphs left to right: stable sort on
/// ascending `x_center` (ties keep input order), concatenate, and average
/// the per-glyph confidences.
///
/// Assumes a single text line in left-to-right reading order. Rotated and
/// two-row plate formats are a known limitation of this reconstruction, not
/// handled here.
pub fn reconstruct(mut detections: Vec<CharacterDetection>) -> RecognitionResult {
    if detections.is_empty() {
        return RecognitionResult {
            plate_text: String::new(),
            confidence: 0.0,
            character_count: 0,
        };
    }

    detections.sort_by(|a, b| a.x_center.total_cmp(&b.x_center));

    let plate_text: String = detections
        .iter()
        .map(|detection| detection.character.as_str())
        .collect();
    let confidence = detections
        .iter()
        .map(|detection| detection.confidence)
        .sum::<f32>()
        / detections.len() as f32;

    RecognitionResult {
        plate_text,
        confidence,
        character_count: detections.len(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn glyph(character: &str, x_center: f32, confidence: f32) -> CharacterDetection {
        CharacterDetection {
            x_center,
            character: character.into(),
            confidence,
        }
    }

    #[test]
    fn empty_input_yields_empty_result() {
        let result = reconstruct(vec![]);
        assert_eq!(result.plate_text, "");
        assert_eq!(result.confidence, 0.0);
        assert_eq!(result.character_count, 0);
    }

    #[test]
    fn glyphs_are_read_left_to_right() {
        let result = reconstruct(vec![
            glyph("B", 10.0, 0.9),
            glyph("1", 30.0, 0.95),
            glyph("A", 20.0, 0.8),
        ]);

        assert_eq!(result.plate_text, "BA1");
        assert_eq!(result.character_count, 3);
        assert!((result.confidence - 0.8833).abs() < 1e-3);
    }

    #[test]
    fn input_order_does_not_matter_for_distinct_positions() {
        let detections = vec![
            glyph("D", 5.0, 0.7),
            glyph("4", 45.0, 0.85),
            glyph("X", 25.0, 0.8),
        ];
        let mut reversed = detections.clone();
        reversed.reverse();

        let a = reconstruct(detections);
        let b = reconstruct(reversed);

        assert_eq!(a.plate_text, b.plate_text);
        assert_eq!(a.plate_text, "DX4");
        assert_eq!(a.confidence, b.confidence);
    }

    #[test]
    fn ties_on_x_center_keep_input_order() {
        let result = reconstruct(vec![
            glyph("A", 10.0, 0.9),
            glyph("B", 10.0, 0.9),
            glyph("C", 10.0, 0.9),
        ]);

        assert_eq!(result.plate_text, "ABC");
    }

    #[test]
    fn confidence_is_arithmetic_mean() {
        let result = reconstruct(vec![glyph("A", 1.0, 0.5), glyph("B", 2.0, 1.0)]);
        assert_eq!(result.confidence, 0.75);
    }
}
