use crate::config::{DetectorBackend, DetectorConfig};
use ndarray::{Array, Ix4};
use opencv::{
    core::{self, Mat, Scalar, Size},
    dnn, imgproc,
    prelude::*,
};
use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::value::TensorRef;
use thiserror::Error;

const NMS_IOU_THRESHOLD: f32 = 0.7;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("Failed to load detection model: {0}")]
    ModelLoadFailed(String),
    #[error("Inference failed: {0}")]
    InferenceFailed(#[from] ort::Error),
    #[error("OpenCV error: {0}")]
    OpenCvError(#[from] opencv::Error),
}

/// One raw detector output, in pixel coordinates of the source frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Detection {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
    pub confidence: f32,
}

impl Detection {
    pub fn width(&self) -> f32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> f32 {
        self.y2 - self.y1
    }
}

/// Plate detection boundary. Two backends share the same letterbox
/// preprocessing and output parsing; the choice is made once at
/// construction from configuration.
pub enum PlateDetector {
    Ort(OrtBackend),
    Dnn(DnnBackend),
}

impl PlateDetector {
    pub fn from_config(config: &DetectorConfig) -> Result<Self, DetectorError> {
        match config.backend {
            DetectorBackend::Ort => Ok(Self::Ort(OrtBackend::new(config)?)),
            DetectorBackend::Dnn => Ok(Self::Dnn(DnnBackend::new(config)?)),
        }
    }

    pub fn detect(&mut self, frame: &Mat) -> Result<Vec<Detection>, DetectorError> {
        match self {
            Self::Ort(backend) => backend.detect(frame),
            Self::Dnn(backend) => backend.detect(frame),
        }
    }
}

pub struct OrtBackend {
    session: Session,
    input_size: i32,
    confidence_threshold: f32,
}

impl OrtBackend {
    pub fn new(config: &DetectorConfig) -> Result<Self, DetectorError> {
        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .commit_from_file(&config.model_path)?;

        tracing::info!(model = ?config.model_path, "loaded ONNX plate detection model");

        Ok(Self {
            session,
            input_size: config.input_size,
            confidence_threshold: config.confidence_threshold,
        })
    }

    fn detect(&mut self, frame: &Mat) -> Result<Vec<Detection>, DetectorError> {
        let (padded, ratio, pad) = letterbox(frame, self.input_size)?;
        let input = to_input_tensor(&padded)?;

        let tensor_ref = TensorRef::from_array_view(input.view())
            .map_err(DetectorError::InferenceFailed)?;
        let outputs = self.session.run(ort::inputs![tensor_ref])?;
        let (_, data) = outputs["output0"].try_extract_tensor::<f32>()?;

        let detections = parse_detections(data, ratio, pad, self.confidence_threshold);
        Ok(non_max_suppression(detections, NMS_IOU_THRESHOLD))
    }
}

pub struct DnnBackend {
    net: dnn::Net,
    input_size: i32,
    confidence_threshold: f32,
}

impl DnnBackend {
    pub fn new(config: &DetectorConfig) -> Result<Self, DetectorError> {
        let model = config.model_path.to_string_lossy().into_owned();
        let net = dnn::read_net(&model, "", "")
            .map_err(|e| DetectorError::ModelLoadFailed(format!("{}: {}", model, e)))?;

        tracing::info!(model = ?config.model_path, "loaded plate detection model via OpenCV DNN");

        Ok(Self {
            net,
            input_size: config.input_size,
            confidence_threshold: config.confidence_threshold,
        })
    }

    fn detect(&mut self, frame: &Mat) -> Result<Vec<Detection>, DetectorError> {
        let (padded, ratio, pad) = letterbox(frame, self.input_size)?;
        let blob = dnn::blob_from_image(
            &padded,
            1.0 / 255.0,
            Size::new(self.input_size, self.input_size),
            Scalar::default(),
            true,
            false,
            core::CV_32F,
        )?;

        self.net.set_input(&blob, "", 1.0, Scalar::default())?;
        let output = self.net.forward_single("")?;
        let data = output.data_typed::<f32>()?;

        let detections = parse_detections(data, ratio, pad, self.confidence_threshold);
        Ok(non_max_suppression(detections, NMS_IOU_THRESHOLD))
    }
}

/// Resize into a square of `size` preserving aspect ratio, padding the rest
/// with neutral gray. Returns the scale ratio and the padding offsets needed
/// to map detections back into source-frame coordinates.
fn letterbox(frame: &Mat, size: i32) -> Result<(Mat, f32, (f32, f32)), DetectorError> {
    let (height, width) = (frame.rows(), frame.cols());
    let ratio = f32::min(size as f32 / height as f32, size as f32 / width as f32);

    let new_width = (width as f32 * ratio).round() as i32;
    let new_height = (height as f32 * ratio).round() as i32;

    let mut resized = Mat::default();
    if new_width != width || new_height != height {
        imgproc::resize(
            frame,
            &mut resized,
            Size::new(new_width, new_height),
            0.0,
            0.0,
            imgproc::INTER_LINEAR,
        )?;
    } else {
        resized = frame.try_clone()?;
    }

    let dw = (size - new_width) as f32 / 2.0;
    let dh = (size - new_height) as f32 / 2.0;

    let top = (dh - 0.1).round() as i32;
    let bottom = (dh + 0.1).round() as i32;
    let left = (dw - 0.1).round() as i32;
    let right = (dw + 0.1).round() as i32;

    let mut padded = Mat::default();
    core::copy_make_border(
        &resized,
        &mut padded,
        top,
        bottom,
        left,
        right,
        core::BORDER_CONSTANT,
        Scalar::new(114.0, 114.0, 114.0, 0.0),
    )?;

    Ok((padded, ratio, (dw, dh)))
}

/// BGR byte image to normalized RGB CHW tensor.
fn to_input_tensor(image: &Mat) -> Result<Array<f32, Ix4>, DetectorError> {
    let rows = image.rows() as usize;
    let cols = image.cols() as usize;
    let data = image.data_bytes()?;

    let mut input = Array::zeros((1, 3, rows, cols));
    for y in 0..rows {
        for x in 0..cols {
            let offset = (y * cols + x) * 3;
            let b = data[offset] as f32;
            let g = data[offset + 1] as f32;
            let r = data[offset + 2] as f32;
            input[[0, 0, y, x]] = r / 255.0;
            input[[0, 1, y, x]] = g / 255.0;
            input[[0, 2, y, x]] = b / 255.0;
        }
    }

    Ok(input)
}

/// Parses flat model output as rows of `[xc, yc, w, h, confidence]` and maps
/// boxes back through the letterbox transform.
fn parse_detections(
    output: &[f32],
    ratio: f32,
    pad: (f32, f32),
    confidence_threshold: f32,
) -> Vec<Detection> {
    let mut detections = Vec::new();

    for row in output.chunks_exact(5) {
        let confidence = row[4];
        if confidence <= confidence_threshold {
            continue;
        }

        let (xc, yc, w, h) = (row[0], row[1], row[2], row[3]);
        detections.push(Detection {
            x1: (xc - w / 2.0 - pad.0) / ratio,
            y1: (yc - h / 2.0 - pad.1) / ratio,
            x2: (xc + w / 2.0 - pad.0) / ratio,
            y2: (yc + h / 2.0 - pad.1) / ratio,
            confidence,
        });
    }

    detections
}

fn intersection(box1: &Detection, box2: &Detection) -> f32 {
    (box1.x2.min(box2.x2) - box1.x1.max(box2.x1)) * (box1.y2.min(box2.y2) - box1.y1.max(box2.y1))
}

fn union(box1: &Detection, box2: &Detection) -> f32 {
    ((box1.x2 - box1.x1) * (box1.y2 - box1.y1)) + ((box2.x2 - box2.x1) * (box2.y2 - box2.y1))
        - intersection(box1, box2)
}

fn non_max_suppression(mut boxes: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
    boxes.sort_by(|box1, box2| box2.confidence.total_cmp(&box1.confidence));
    let mut result = Vec::new();

    while !boxes.is_empty() {
        let best = boxes[0];
        result.push(best);
        boxes.retain(|candidate| intersection(&best, candidate) / union(&best, candidate) < iou_threshold);
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_detections_filters_by_confidence() {
        // Two rows, identity letterbox.
        let output = [
            100.0, 50.0, 80.0, 20.0, 0.9, //
            300.0, 200.0, 60.0, 12.0, 0.1,
        ];
        let detections = parse_detections(&output, 1.0, (0.0, 0.0), 0.4);

        assert_eq!(detections.len(), 1);
        assert_eq!(detections[0].x1, 60.0);
        assert_eq!(detections[0].y1, 40.0);
        assert_eq!(detections[0].x2, 140.0);
        assert_eq!(detections[0].y2, 60.0);
    }

    #[test]
    fn parse_detections_reverses_letterbox_transform() {
        let output = [220.0, 120.0, 100.0, 20.0, 0.8];
        // Source frame was scaled by 0.5 and padded 20px left/right.
        let detections = parse_detections(&output, 0.5, (20.0, 0.0), 0.4);

        assert_eq!(detections.len(), 1);
        assert_eq!(detections[0].x1, 300.0);
        assert_eq!(detections[0].x2, 500.0);
        assert_eq!(detections[0].y1, 220.0);
        assert_eq!(detections[0].y2, 260.0);
    }

    #[test]
    fn non_max_suppression_keeps_highest_confidence_of_overlap() {
        let boxes = vec![
            Detection {
                x1: 0.0,
                y1: 0.0,
                x2: 100.0,
                y2: 20.0,
                confidence: 0.6,
            },
            Detection {
                x1: 2.0,
                y1: 1.0,
                x2: 102.0,
                y2: 21.0,
                confidence: 0.9,
            },
            Detection {
                x1: 400.0,
                y1: 300.0,
                x2: 500.0,
                y2: 320.0,
                confidence: 0.5,
            },
        ];

        let kept = non_max_suppression(boxes, 0.7);

        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].confidence, 0.9);
        assert_eq!(kept[1].confidence, 0.5);
    }
}
