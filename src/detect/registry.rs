use std::fmt;
use std::path::PathBuf;

use log::info;

use crate::detect::backend::Detector;
use crate::detect::backends::StubDetector;
use crate::error::{PipelineError, PipelineResult};

/// Resolved model reference.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ModelRef {
    /// Built-in stub detector; no model file.
    Stub,
    /// YOLOv8 ONNX export on disk.
    Onnx(PathBuf),
}

impl ModelRef {
    pub fn parse(reference: &str) -> PipelineResult<Self> {
        let trimmed = reference.trim();
        if trimmed.is_empty() {
            return Err(PipelineError::Config("model reference must not be empty".to_string()));
        }
        if trimmed.eq_ignore_ascii_case("stub") {
            return Ok(Self::Stub);
        }
        let path = PathBuf::from(trimmed);
        let is_onnx = path
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case("onnx"))
            .unwrap_or(false);
        if is_onnx {
            Ok(Self::Onnx(path))
        } else {
            Err(PipelineError::Config(format!(
                "unsupported model reference '{}': expected 'stub' or a .onnx file",
                trimmed
            )))
        }
    }
}

impl fmt::Display for ModelRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stub => f.write_str("stub"),
            Self::Onnx(path) => write!(f, "{}", path.display()),
        }
    }
}

/// Build the detector named by a model reference.
///
/// ONNX models need the `backend-tract` feature; without it the reference is
/// rejected as a configuration error.
pub fn load_detector(reference: &str, input_size: u32) -> PipelineResult<Box<dyn Detector>> {
    let model = ModelRef::parse(reference)?;
    let detector: Box<dyn Detector> = match &model {
        ModelRef::Stub => Box::new(StubDetector::new()),
        ModelRef::Onnx(path) => load_onnx(path, input_size)?,
    };
    info!("Detector: using {} backend for model {}", detector.name(), model);
    Ok(detector)
}

#[cfg(feature = "backend-tract")]
fn load_onnx(path: &std::path::Path, input_size: u32) -> PipelineResult<Box<dyn Detector>> {
    let detector = crate::detect::backends::TractYolo::new(path, input_size)
        .map_err(|err| PipelineError::Config(format!("{:#}", err)))?;
    Ok(Box::new(detector))
}

#[cfg(not(feature = "backend-tract"))]
fn load_onnx(path: &std::path::Path, _input_size: u32) -> PipelineResult<Box<dyn Detector>> {
    Err(PipelineError::Config(format!(
        "model {} requires the backend-tract feature",
        path.display()
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_stub_and_onnx_references() -> PipelineResult<()> {
        assert_eq!(ModelRef::parse("stub")?, ModelRef::Stub);
        assert_eq!(ModelRef::parse(" STUB ")?, ModelRef::Stub);
        assert_eq!(
            ModelRef::parse("models/yolov8n.onnx")?,
            ModelRef::Onnx(PathBuf::from("models/yolov8n.onnx"))
        );
        Ok(())
    }

    #[test]
    fn rejects_unknown_references() {
        assert!(matches!(ModelRef::parse("yolov8n.pt"), Err(PipelineError::Config(_))));
        assert!(matches!(ModelRef::parse(""), Err(PipelineError::Config(_))));
    }

    #[test]
    fn stub_reference_loads_stub_detector() -> PipelineResult<()> {
        let detector = load_detector("stub", 640)?;
        assert_eq!(detector.name(), "stub");
        Ok(())
    }

    #[cfg(not(feature = "backend-tract"))]
    #[test]
    fn onnx_without_feature_is_config_error() {
        assert!(matches!(load_detector("yolov8n.onnx", 640), Err(PipelineError::Config(_))));
    }
}
