// # Pipeline Façade
//
// The controller, its configuration surface, the typed event stream, and
// the job commands the pipeline submits on its own behalf.

pub mod commands;
pub mod config;
pub mod controller;
pub mod events;

pub use commands::{CacheMaintenanceCommand, PageLoadCommand};
pub use config::{
    CacheSettings, PipelineConfig, PipelineConfigUpdate, ViewMode,
};
pub use controller::{
    LoadOptions, LoadOutcome, LoadResult, PipelineController, PipelineState,
};
pub use events::{EventEmitter, ListenerId, PipelineEvent, PreloadPhase};
