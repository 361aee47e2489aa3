mod backend;
mod backends;
pub mod decode;
pub mod labels;
pub mod nms;
mod registry;
mod result;

pub use backend::Detector;
pub use backends::StubDetector;
#[cfg(feature = "backend-tract")]
pub use backends::TractYolo;
pub use registry::{load_detector, ModelRef};
pub use result::{Detection, DetectionOutput, StageTiming};
