//! Remove AI-generator watermarks and plain backgrounds from batches of images.
//!
//! Watermarks are found heuristically: fixed candidate regions along the
//! bottom edge are scored by edge density, text-like strokes inside the
//! passing ones are boxed, and the boxes are filled with a fast-marching
//! inpainting pass. Backgrounds are removed by keying out a named or
//! auto-detected color (with a soft, un-blended fringe) or, with the `ai`
//! feature, by a pretrained matting model run through ONNX Runtime.
//!
//! # Quick Start
//!
//! ```no_run
//! use image_purifier::{detection, inpaint};
//!
//! let mut img = image::open("photo.png").unwrap().into_rgba8();
//! let regions = detection::locate(&img, false);
//! inpaint::remove_in_place(&mut img, &regions);
//! img.save("cleaned.png").unwrap();
//! ```
//!
//! # Batches
//!
//! ```no_run
//! use std::path::Path;
//! use image_purifier::{plan_jobs, BackgroundSpec, BatchSummary, ProcessingOptions, Processor};
//!
//! let options = ProcessingOptions {
//!     remove_watermark: true,
//!     background: Some(BackgroundSpec::Auto),
//!     ..ProcessingOptions::default()
//! }
//! .validate()
//! .unwrap();
//!
//! let jobs = plan_jobs(Path::new("renders"), None, &options).unwrap();
//! let mut processor = Processor::new(options);
//! let results = processor.process(&jobs);
//! processor.finish();
//!
//! let summary = BatchSummary::from_results(&results);
//! println!("{} ok, {} failed", summary.succeeded, summary.failed.len());
//! ```

#![deny(missing_docs)]

pub mod ai;
pub mod color;
pub mod detection;
mod engine;
pub mod error;
pub mod inpaint;
pub mod region;
pub mod segment;

pub use ai::{AiModel, AiSegmenter};
pub use color::{detect_background_color, BackgroundSpec, Color, NamedColor};
pub use engine::{
    default_output_root, discover, is_supported_image, output_path, plan_jobs, process,
    save_image, BackgroundStrategy, BatchSummary, Job, ProcessingOptions, ProcessingResult,
    Processor, DEFAULT_OUTPUT_DIR,
};
pub use error::{Error, Result};
pub use region::{Mask, Region};
