// # Super-Resolution
//
// The engine interface (out-of-process model + disk cache) and the
// service that deduplicates requests, bounds engine concurrency, and
// feeds results into the upscale store.

pub mod engine;
pub mod service;

pub use engine::{SrConfig, SrEngine};
pub use service::{
    UpscaleEvent, UpscaleService, UpscaleState, UpscaleTask, DEFAULT_MAX_CONCURRENT_UPSCALES,
};
