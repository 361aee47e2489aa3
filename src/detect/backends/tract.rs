#![cfg(feature = "backend-tract")]

use std::path::Path;
use std::time::Instant;

use anyhow::{anyhow, Context, Result};
use image::{imageops, imageops::FilterType, RgbImage};
use tract_onnx::prelude::*;

use crate::detect::backend::Detector;
use crate::detect::decode::{decode_yolov8, DecodeParams};
use crate::detect::nms::non_max_suppression;
use crate::detect::result::{DetectionOutput, StageTiming};
use crate::frame::Frame;

/// Square input edge used by exported YOLOv8 models.
pub const DEFAULT_INPUT_SIZE: u32 = 640;
const DEFAULT_CONFIDENCE: f32 = 0.25;
const DEFAULT_IOU: f32 = 0.7;

/// YOLOv8 detector running an ONNX export through tract.
///
/// Frames are resized to the model input, converted BGR to RGB, and scaled to
/// `[0, 1]`. Boxes come back in frame pixel coordinates after class-agnostic NMS.
pub struct TractYolo {
    model: SimplePlan<TypedFact, Box<dyn TypedOp>>,
    input_size: u32,
    confidence_threshold: f32,
    iou_threshold: f32,
}

impl TractYolo {
    /// Load an ONNX model from disk and prepare it for inference.
    pub fn new<P: AsRef<Path>>(model_path: P, input_size: u32) -> Result<Self> {
        let model_path = model_path.as_ref();
        let side = input_size as usize;
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(0, InferenceFact::dt_shape(f32::datum_type(), tvec!(1, 3, side, side)))
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        Ok(Self {
            model,
            input_size,
            confidence_threshold: DEFAULT_CONFIDENCE,
            iou_threshold: DEFAULT_IOU,
        })
    }

    pub fn with_thresholds(mut self, confidence: f32, iou: f32) -> Self {
        self.confidence_threshold = confidence;
        self.iou_threshold = iou;
        self
    }

    fn build_input(&self, frame: &Frame) -> Result<Tensor> {
        let mut rgb = Vec::with_capacity(frame.as_bytes().len());
        for px in frame.as_bytes().chunks_exact(3) {
            rgb.extend_from_slice(&[px[2], px[1], px[0]]);
        }
        let image = RgbImage::from_raw(frame.width(), frame.height(), rgb)
            .ok_or_else(|| anyhow!("frame buffer does not match {}x{}", frame.width(), frame.height()))?;
        let resized = imageops::resize(&image, self.input_size, self.input_size, FilterType::Triangle);

        let side = self.input_size as usize;
        let input = tract_ndarray::Array4::from_shape_fn((1, 3, side, side), |(_, channel, y, x)| {
            resized.get_pixel(x as u32, y as u32)[channel] as f32 / 255.0
        });
        Ok(input.into_tensor())
    }
}

impl Detector for TractYolo {
    fn name(&self) -> &'static str {
        "tract-yolov8"
    }

    fn detect(&mut self, frame: &Frame) -> Result<DetectionOutput> {
        let started = Instant::now();
        let input = self.build_input(frame)?;
        let preprocess = started.elapsed();

        let started = Instant::now();
        let outputs = self.model.run(tvec!(input.into())).context("ONNX inference failed")?;
        let inference = started.elapsed();

        let started = Instant::now();
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let view = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?;
        let shape = view.shape().to_vec();
        if shape.len() != 3 || shape[0] != 1 {
            return Err(anyhow!("unexpected YOLO output shape {:?}", shape));
        }
        let data: Vec<f32> = view.iter().copied().collect();
        let side = self.input_size as f32;
        let params = DecodeParams {
            confidence_threshold: self.confidence_threshold,
            scale_x: frame.width() as f32 / side,
            scale_y: frame.height() as f32 / side,
            frame_width: frame.width() as f32,
            frame_height: frame.height() as f32,
        };
        let candidates = decode_yolov8(&data, shape[1], shape[2], params)?;
        let detections = non_max_suppression(candidates, self.iou_threshold);
        let postprocess = started.elapsed();

        Ok(DetectionOutput {
            detections,
            timing: StageTiming {
                preprocess,
                inference,
                postprocess,
            },
        })
    }

    fn warm_up(&mut self) -> Result<()> {
        let side = self.input_size as usize;
        let blank = tract_ndarray::Array4::<f32>::zeros((1, 3, side, side)).into_tensor();
        self.model
            .run(tvec!(blank.into()))
            .context("ONNX warm-up inference failed")?;
        Ok(())
    }
}
