pub mod config;
pub mod controller;
pub mod descriptor;
pub mod error;
pub mod filter;
pub mod generation;
pub mod hosts;
pub mod llm;
pub mod materialize;
pub mod patch;
pub mod pipeline;
pub mod selection;
pub mod serializer;
pub mod storage;
pub mod utils;

// Re-export commonly used types for convenience
pub use config::{GenerationStrategy, OverlayConfig};
pub use controller::{ExtensionRequest, ExtensionResponse, Mode, OverlayController};
pub use descriptor::ElementDescriptor;
pub use hosts::{PageHost, VirtualPage, WebDriverPage};
pub use patch::{Operation, Patch, apply_patch};
pub use pipeline::{Pipeline, PipelineBuilder, PipelineOutput};
pub use serializer::{CapturedPage, Serializer};
