// PagePipe - Image pipeline core for comic and manga readers
// Core library module

pub mod cache;
pub mod common;
pub mod error;
pub mod jobs;
pub mod loader;
pub mod pipeline;
pub mod preload;
pub mod upscale;

pub use error::{PipelineError, Result};
pub use pipeline::{
    LoadOptions, LoadOutcome, LoadResult, PipelineConfig, PipelineConfigUpdate,
    PipelineController, PipelineEvent, PipelineState, ViewMode,
};
