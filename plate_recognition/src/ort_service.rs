use crate::config::ModelSettings;
use crate::model_service::{CharacterDetection, CharacterModel, ModelError};
use image::{imageops::FilterType, GenericImageView};
use ndarray::{Array, Ix4};
use ort::{
    execution_providers::TensorRTExecutionProvider,
    session::{builder::GraphOptimizationLevel, Session},
    value::TensorRef,
};
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc, Mutex,
};

const MODEL_INPUT_SIZE: u32 = 640;
const NMS_IOU_THRESHOLD: f32 = 0.7;

#[derive(Debug, Clone, Copy)]
struct CharBox {
    x1: f32,
    y1: f32,
    x2: f32,
    y2: f32,
    class_id: usize,
    confidence: f32,
}

fn intersection(box1: &CharBox, box2: &CharBox) -> f32 {
    (box1.x2.min(box2.x2) - box1.x1.max(box2.x1)) * (box1.y2.min(box2.y2) - box1.y1.max(box2.y1))
}

fn union(box1: &CharBox, box2: &CharBox) -> f32 {
    ((box1.x2 - box1.x1) * (box1.y2 - box1.y1)) + ((box2.x2 - box2.x1) * (box2.y2 - box2.y1))
        - intersection(box1, box2)
}

fn transform_image(image_data: &[u8]) -> Result<(Array<f32, Ix4>, u32, u32), ModelError> {
    let image_reader = image::ImageReader::new(std::io::Cursor::new(image_data))
        .with_guessed_format()
        .map_err(|e| ModelError::InvalidImage(format!("Error decoding image: {}", e)))?;

    let original_img = image_reader
        .decode()
        .map_err(|e| ModelError::InvalidImage(format!("Error decoding image: {}", e)))?;

    let (img_width, img_height) = original_img.dimensions();
    let img = original_img.resize_exact(MODEL_INPUT_SIZE, MODEL_INPUT_SIZE, FilterType::CatmullRom);

    let size = MODEL_INPUT_SIZE as usize;
    let mut input = Array::zeros((1, 3, size, size));
    for pixel in img.pixels() {
        let x = pixel.0 as _;
        let y = pixel.1 as _;
        let [r, g, b, _] = pixel.2 .0;
        input[[0, 0, y, x]] = (r as f32) / 255.;
        input[[0, 1, y, x]] = (g as f32) / 255.;
        input[[0, 2, y, x]] = (b as f32) / 255.;
    }

    Ok((input, img_height, img_width))
}

/// `ort`-backed character detector with a pool of sessions handed out
/// round-robin, so concurrent requests do not serialize on one session.
pub struct OrtCharacterModel {
    sessions: Arc<Vec<Arc<Mutex<Session>>>>,
    counter: Arc<AtomicUsize>,
    labels: Vec<String>,
    min_confidence: f32,
}

impl OrtCharacterModel {
    pub fn new(settings: &ModelSettings, labels: Vec<String>) -> anyhow::Result<Self> {
        ort::init()
            .with_execution_providers([TensorRTExecutionProvider::default()
                .with_engine_cache(true)
                .build()])
            .commit()?;

        let num_instances = settings.num_instances;
        let sessions = (0..num_instances)
            .map(|_| {
                let session = Session::builder()?
                    .with_optimization_level(GraphOptimizationLevel::Level3)?
                    .commit_from_file(settings.get_model_path())?;
                Ok(Arc::new(Mutex::new(session)))
            })
            .collect::<Result<Vec<_>, ort::Error>>()?;

        tracing::info!(
            "Created {} ONNX sessions for {} character classes",
            num_instances,
            labels.len()
        );

        Ok(Self {
            sessions: Arc::new(sessions),
            counter: Arc::new(AtomicUsize::new(0)),
            labels,
            min_confidence: settings.min_confidence,
        })
    }

    fn run_inference(&self, input: &Array<f32, Ix4>) -> Result<Vec<f32>, ModelError> {
        let index = self.counter.fetch_add(1, Ordering::SeqCst) % self.sessions.len();
        let session_arc = &self.sessions[index];
        let mut session = session_arc
            .lock()
            .map_err(|e| ModelError::InferenceFailed(format!("session mutex poisoned: {}", e)))?;

        tracing::debug!("Handling request with session {}", index);

        let tensor_ref = TensorRef::from_array_view(input.view())
            .map_err(|e| ModelError::InferenceFailed(format!("failed to build tensor: {}", e)))?;

        let outputs = session
            .run(ort::inputs![tensor_ref])
            .map_err(|e| ModelError::InferenceFailed(format!("inference failed: {}", e)))?;

        let (_, data) = outputs["output0"]
            .try_extract_tensor::<f32>()
            .map_err(|e| ModelError::InferenceFailed(format!("failed to extract tensor: {}", e)))?;

        Ok(data.to_vec())
    }

    fn parse_boxes(&self, output: &[f32], img_width: u32, img_height: u32) -> Vec<CharBox> {
        let stride = 4 + self.labels.len();
        let mut boxes = Vec::new();

        for row in output.chunks_exact(stride) {
            let (class_id, confidence) = row
                .iter()
                .skip(4)
                .enumerate()
                .map(|(index, value)| (index, *value))
                .reduce(|accum, candidate| {
                    if candidate.1 > accum.1 {
                        candidate
                    } else {
                        accum
                    }
                })
                .unwrap_or((0, 0.0));

            if confidence < self.min_confidence {
                continue;
            }

            let size = MODEL_INPUT_SIZE as f32;
            let xc = row[0] / size * (img_width as f32);
            let yc = row[1] / size * (img_height as f32);
            let w = row[2] / size * (img_width as f32);
            let h = row[3] / size * (img_height as f32);

            boxes.push(CharBox {
                class_id,
                confidence,
                x1: xc - w / 2.,
                y1: yc - h / 2.,
                x2: xc + w / 2.,
                y2: yc + h / 2.,
            });
        }

        boxes
    }
}

impl CharacterModel for OrtCharacterModel {
    fn detect_characters(&self, image_data: &[u8]) -> Result<Vec<CharacterDetection>, ModelError> {
        let (input, img_height, img_width) = transform_image(image_data)?;
        let output = self.run_inference(&input)?;

        let mut boxes = self.parse_boxes(&output, img_width, img_height);
        boxes.sort_by(|box1, box2| box2.confidence.total_cmp(&box1.confidence));

        let mut kept = Vec::new();
        while !boxes.is_empty() {
            let best = boxes[0];
            kept.push(best);
            boxes.retain(|candidate| {
                intersection(&best, candidate) / union(&best, candidate) < NMS_IOU_THRESHOLD
            });
        }

        kept.into_iter()
            .map(|glyph| {
                let character = self
                    .labels
                    .get(glyph.class_id)
                    .ok_or(ModelError::UnknownClass(glyph.class_id))?
                    .clone();
                Ok(CharacterDetection {
                    x_center: (glyph.x1 + glyph.x2) / 2.0,
                    character,
                    confidence: glyph.confidence,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, Rgb};
    use std::io::Cursor;

    #[test]
    fn transform_image_normalizes_to_model_input() {
        let img = ImageBuffer::<Rgb<u8>, Vec<u8>>::from_pixel(100, 50, Rgb([255, 0, 0]));
        let mut image_data: Vec<u8> = Vec::new();
        let mut cursor = Cursor::new(&mut image_data);
        img.write_to(&mut cursor, image::ImageFormat::Png).unwrap();

        let (input, img_height, img_width) = transform_image(cursor.get_ref()).unwrap();

        assert_eq!(input.shape(), &[1, 3, 640, 640]);
        assert_eq!(img_width, 100);
        assert_eq!(img_height, 50);
    }

    #[test]
    fn transform_image_rejects_garbage() {
        let result = transform_image(&[0u8; 64]);
        assert!(matches!(result, Err(ModelError::InvalidImage(_))));
    }
}
