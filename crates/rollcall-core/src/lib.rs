//! rollcall-core — Face capability seam for the attendance tool.
//!
//! Detection (SCRFD) and descriptor extraction (ArcFace) run via ONNX
//! Runtime behind the [`FaceEngine`] trait; matching and name resolution
//! are plain vector math over the enrolled descriptors.

pub mod engine;
pub mod resolve;
pub mod types;

pub use engine::{EngineError, FaceEngine, OnnxEngine};
pub use resolve::resolve_name;
pub use types::{crop_region, match_flags, Descriptor, DescriptorRecord, FaceRegion};
