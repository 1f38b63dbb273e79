//! Batch orchestration: options, job planning, per-file pipeline and summary.

use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use image::{DynamicImage, ImageFormat, RgbaImage};
use walkdir::WalkDir;

use crate::ai::{AiModel, AiSegmenter};
use crate::color::{detect_background_color, BackgroundSpec, Color};
use crate::detection;
use crate::error::{Error, Result};
use crate::inpaint;
use crate::segment::remove_color_background;

/// Name of the directory created next to the input when no output is given.
pub const DEFAULT_OUTPUT_DIR: &str = "output";

/// Per-run configuration. Built once, validated, then only read.
#[derive(Debug, Clone, Default)]
#[allow(clippy::struct_excessive_bools)]
pub struct ProcessingOptions {
    /// Locate and inpaint generator watermarks.
    pub remove_watermark: bool,
    /// Remove a solid-color or auto-detected background.
    pub background: Option<BackgroundSpec>,
    /// Always inpaint the whole bottom band, regardless of its edge score.
    pub aggressive: bool,
    /// Remove the background with a segmentation model.
    pub use_ai: bool,
    /// Which model to use with [`use_ai`](Self::use_ai); rembg when unset.
    pub ai_model: Option<AiModel>,
    /// Descend into subdirectories, mirroring them under the output root.
    pub recursive: bool,
    /// Explicit model file, overriding the model directory lookup.
    pub model_path: Option<PathBuf>,
}

/// How the background of each image is removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackgroundStrategy {
    /// Key out a fixed color.
    Color(Color),
    /// Detect the color from the image border, then key it out.
    Auto,
    /// Delegate to a segmentation model.
    Ai(AiModel),
}

impl ProcessingOptions {
    /// Check that the options describe a runnable job.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidOption`] if no operation is selected or if an
    /// AI model is named without enabling AI segmentation.
    pub fn validate(self) -> Result<Self> {
        if !self.remove_watermark && self.background.is_none() && !self.use_ai {
            return Err(Error::InvalidOption(
                "nothing to do: pass --watermark, --background or --use-ai".to_string(),
            ));
        }
        if self.ai_model.is_some() && !self.use_ai {
            return Err(Error::InvalidOption("--ai-model requires --use-ai".to_string()));
        }
        if self.use_ai {
            if let Some(spec) = self.background {
                log::warn!("--use-ai overrides --background {spec}; the color is ignored");
            }
        }
        if self.aggressive && !self.remove_watermark {
            log::warn!("--aggressive has no effect without --watermark");
        }
        Ok(self)
    }

    /// The background strategy these options select, if any.
    #[must_use]
    pub fn background_strategy(&self) -> Option<BackgroundStrategy> {
        if self.use_ai {
            return Some(BackgroundStrategy::Ai(
                self.ai_model.unwrap_or(AiModel::Rembg),
            ));
        }
        self.background.map(|spec| match spec {
            BackgroundSpec::Named(named) => BackgroundStrategy::Color(named.color()),
            BackgroundSpec::Auto => BackgroundStrategy::Auto,
        })
    }

    /// Whether outputs carry transparency (and are therefore written as PNG).
    #[must_use]
    pub fn removes_background(&self) -> bool {
        self.background_strategy().is_some()
    }
}

/// One file to process and where its result goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    /// Source image.
    pub input: PathBuf,
    /// Destination file.
    pub output: PathBuf,
}

/// Outcome of processing a single file.
#[derive(Debug)]
pub struct ProcessingResult {
    /// Source image.
    pub input_path: PathBuf,
    /// Destination that was (or would have been) written.
    pub output_path: PathBuf,
    /// Whether the output was written.
    pub success: bool,
    /// Why the file failed, when it did.
    pub error: Option<Error>,
}

/// Aggregate of a finished batch.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BatchSummary {
    /// Number of files written successfully.
    pub succeeded: usize,
    /// Failed inputs with their error messages, in processing order.
    pub failed: Vec<(PathBuf, String)>,
}

impl BatchSummary {
    /// Summarise a list of per-file results.
    #[must_use]
    pub fn from_results(results: &[ProcessingResult]) -> Self {
        let mut summary = Self::default();
        for r in results {
            if r.success {
                summary.succeeded += 1;
            } else {
                let message = r
                    .error
                    .as_ref()
                    .map_or_else(|| "unknown error".to_string(), ToString::to_string);
                summary.failed.push((r.input_path.clone(), message));
            }
        }
        summary
    }

    /// Total number of files attempted.
    #[must_use]
    pub fn total(&self) -> usize {
        self.succeeded + self.failed.len()
    }

    /// Whether every attempted file succeeded. True for an empty batch.
    #[must_use]
    pub fn all_succeeded(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Runs the per-file pipeline and owns the run-scoped model handle.
///
/// The segmentation model, when one is needed, is loaded by the first file
/// that uses it and kept until [`finish`](Self::finish).
#[derive(Debug)]
pub struct Processor {
    options: ProcessingOptions,
    segmenter: Option<AiSegmenter>,
}

impl Processor {
    /// Create a processor for validated options.
    #[must_use]
    pub fn new(options: ProcessingOptions) -> Self {
        let segmenter = match options.background_strategy() {
            Some(BackgroundStrategy::Ai(model)) => {
                Some(AiSegmenter::new(model, options.model_path.clone()))
            }
            _ => None,
        };
        Self { options, segmenter }
    }

    /// Create a processor that uses the given segmenter for AI strategies.
    #[must_use]
    pub fn with_segmenter(options: ProcessingOptions, segmenter: AiSegmenter) -> Self {
        Self {
            options,
            segmenter: Some(segmenter),
        }
    }

    /// The options this processor runs with.
    #[must_use]
    pub fn options(&self) -> &ProcessingOptions {
        &self.options
    }

    /// Process every job in order. A failing file is recorded and the batch
    /// moves on to the next one.
    pub fn process(&mut self, jobs: &[Job]) -> Vec<ProcessingResult> {
        jobs.iter()
            .map(|job| {
                let outcome = self.process_file(&job.input, &job.output);
                match &outcome {
                    Ok(()) => log::info!("{} -> {}", job.input.display(), job.output.display()),
                    Err(e) => log::debug!("{} failed: {e}", job.input.display()),
                }
                ProcessingResult {
                    input_path: job.input.clone(),
                    output_path: job.output.clone(),
                    success: outcome.is_ok(),
                    error: outcome.err(),
                }
            })
            .collect()
    }

    /// Load, clean and save one image.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnreadableFile`] if the input cannot be decoded,
    /// [`Error::AiModelUnavailable`] or [`Error::Inference`] if AI
    /// segmentation fails, and [`Error::UnwritableOutput`] if the result
    /// cannot be written.
    pub fn process_file(&mut self, input: &Path, output: &Path) -> Result<()> {
        let decoded = image::open(input).map_err(|source| Error::UnreadableFile {
            path: input.to_path_buf(),
            source,
        })?;
        let had_alpha = decoded.color().has_alpha();
        let mut img = decoded.into_rgba8();

        if self.options.remove_watermark {
            let regions = detection::locate(&img, self.options.aggressive);
            if regions.is_empty() {
                log::debug!("{}: no watermark found", input.display());
            } else {
                log::debug!("{}: inpainting {} region(s)", input.display(), regions.len());
                inpaint::remove_in_place(&mut img, &regions);
            }
        }

        let strategy = self.options.background_strategy();
        match strategy {
            None => {}
            Some(BackgroundStrategy::Color(color)) => {
                remove_color_background(&mut img, &color);
            }
            Some(BackgroundStrategy::Auto) => {
                let color = detect_background_color(&img);
                log::debug!("{}: background {color}", input.display());
                remove_color_background(&mut img, &color);
            }
            Some(BackgroundStrategy::Ai(model)) => {
                let model_path = &self.options.model_path;
                let segmenter = self
                    .segmenter
                    .get_or_insert_with(|| AiSegmenter::new(model, model_path.clone()));
                let mask = segmenter.segment(&img)?;
                mask.apply_as_alpha(&mut img);
            }
        }

        if let Some(parent) = output.parent() {
            std::fs::create_dir_all(parent).map_err(|e| Error::UnwritableOutput {
                path: output.to_path_buf(),
                reason: format!("cannot create directory {}: {e}", parent.display()),
            })?;
        }
        save_image(&img, output, had_alpha || strategy.is_some())
    }

    /// End the run: release the segmentation model if one was loaded.
    pub fn finish(&mut self) {
        if let Some(segmenter) = self.segmenter.as_mut() {
            segmenter.unload();
        }
    }
}

/// Process `jobs` with `options`, releasing any loaded model afterwards.
#[must_use]
pub fn process(jobs: &[Job], options: &ProcessingOptions) -> Vec<ProcessingResult> {
    let mut processor = Processor::new(options.clone());
    let results = processor.process(jobs);
    processor.finish();
    results
}

/// Check if a file has a supported image extension.
#[must_use]
pub fn is_supported_image(path: &Path) -> bool {
    match path.extension().and_then(|e| e.to_str()) {
        Some(ext) => matches!(
            ext.to_lowercase().as_str(),
            "jpg" | "jpeg" | "png" | "bmp" | "tiff" | "tif" | "webp"
        ),
        None => false,
    }
}

/// Where outputs go when no output path is given: an `output` directory inside
/// an input directory, or next to an input file.
#[must_use]
pub fn default_output_root(input: &Path) -> PathBuf {
    if input.is_dir() {
        input.join(DEFAULT_OUTPUT_DIR)
    } else {
        input
            .parent()
            .unwrap_or(Path::new("."))
            .join(DEFAULT_OUTPUT_DIR)
    }
}

/// Destination for a file at `relative` below the output root. Outputs with
/// transparency are always PNG.
#[must_use]
pub fn output_path(root: &Path, relative: &Path, removes_background: bool) -> PathBuf {
    let path = root.join(relative);
    if removes_background && !has_png_extension(&path) {
        path.with_extension("png")
    } else {
        path
    }
}

fn has_png_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("png"))
}

/// Supported images under `dir`, sorted by path. With `recursive`, files below
/// `skip` (normally the output root) are left out.
///
/// # Errors
///
/// Returns [`Error::Io`] if `dir` itself cannot be read.
pub fn discover(dir: &Path, recursive: bool, skip: Option<&Path>) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();

    if recursive {
        let skip = skip.and_then(|s| s.canonicalize().ok());
        let walker = WalkDir::new(dir).into_iter().filter_entry(|entry| {
            !(entry.depth() > 0
                && entry.file_type().is_dir()
                && skip.as_ref().is_some_and(|s| {
                    entry.path().canonicalize().is_ok_and(|p| &p == s)
                }))
        });
        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) if e.depth() == 0 => return Err(Error::Io(e.into())),
                Err(e) => {
                    log::warn!("skipping unreadable entry: {e}");
                    continue;
                }
            };
            if entry.file_type().is_file() && is_supported_image(entry.path()) {
                files.push(entry.into_path());
            }
        }
    } else {
        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                let path = entry.path();
                if is_supported_image(&path) {
                    files.push(path);
                }
            }
        }
    }

    files.sort();
    Ok(files)
}

/// Turn an input path and optional output path into the batch's jobs.
///
/// A single file goes to `output` if given, else `<parent>/output/<name>`.
/// A directory is scanned (recursively if requested) and its images are
/// mirrored under `output`, defaulting to `<dir>/output`.
///
/// # Errors
///
/// Returns [`Error::InvalidOption`] if `input` does not exist and
/// [`Error::Io`] if a directory cannot be read.
pub fn plan_jobs(
    input: &Path,
    output: Option<&Path>,
    options: &ProcessingOptions,
) -> Result<Vec<Job>> {
    let removes_background = options.removes_background();

    if input.is_file() {
        let output = match output {
            Some(path) => output_path(Path::new(""), path, removes_background),
            None => {
                let name = input.file_name().map(PathBuf::from).unwrap_or_default();
                output_path(&default_output_root(input), &name, removes_background)
            }
        };
        return Ok(vec![Job {
            input: input.to_path_buf(),
            output,
        }]);
    }

    if !input.is_dir() {
        return Err(Error::InvalidOption(format!(
            "input path does not exist: {}",
            input.display()
        )));
    }

    let root = output.map_or_else(|| default_output_root(input), Path::to_path_buf);
    let jobs = discover(input, options.recursive, Some(&root))?
        .into_iter()
        .filter_map(|path| {
            let relative = path.strip_prefix(input).ok()?.to_path_buf();
            Some(Job {
                output: output_path(&root, &relative, removes_background),
                input: path,
            })
        })
        .collect();
    Ok(jobs)
}

/// Save an RGBA image, choosing the encoding from the file extension.
///
/// JPEG is written at quality 100 without alpha. With `keep_alpha` false the
/// alpha channel is dropped for every format.
///
/// # Errors
///
/// Returns [`Error::UnwritableOutput`] if the format is unsupported or
/// writing fails.
pub fn save_image(img: &RgbaImage, path: &Path, keep_alpha: bool) -> Result<()> {
    let unwritable = |reason: String| Error::UnwritableOutput {
        path: path.to_path_buf(),
        reason,
    };
    let format = ImageFormat::from_path(path).map_err(|e| unwritable(e.to_string()))?;

    let dyn_img = DynamicImage::ImageRgba8(img.clone());
    match format {
        ImageFormat::Jpeg => {
            let file = File::create(path).map_err(|e| unwritable(e.to_string()))?;
            let mut encoder =
                image::codecs::jpeg::JpegEncoder::new_with_quality(BufWriter::new(file), 100);
            encoder
                .encode_image(&DynamicImage::ImageRgb8(dyn_img.to_rgb8()))
                .map_err(|e| unwritable(e.to_string()))?;
        }
        ImageFormat::Png | ImageFormat::WebP | ImageFormat::Bmp | ImageFormat::Tiff => {
            let out = if keep_alpha {
                dyn_img
            } else {
                DynamicImage::ImageRgb8(dyn_img.to_rgb8())
            };
            out.save_with_format(path, format)
                .map_err(|e| unwritable(e.to_string()))?;
        }
        _ => {
            return Err(unwritable(format!("unsupported output format {format:?}")));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::color::NamedColor;
    use image::Rgba;

    fn watermark_only() -> ProcessingOptions {
        ProcessingOptions {
            remove_watermark: true,
            ..ProcessingOptions::default()
        }
    }

    #[test]
    fn validate_requires_an_operation() {
        let err = ProcessingOptions::default().validate().unwrap_err();
        assert!(matches!(err, Error::InvalidOption(_)));
        assert!(watermark_only().validate().is_ok());
    }

    #[test]
    fn validate_rejects_model_without_use_ai() {
        let opts = ProcessingOptions {
            ai_model: Some(AiModel::Rmbg),
            ..watermark_only()
        };
        assert!(matches!(opts.validate(), Err(Error::InvalidOption(_))));
    }

    #[test]
    fn use_ai_wins_over_color_background() {
        let opts = ProcessingOptions {
            background: Some(BackgroundSpec::Named(NamedColor::Green)),
            use_ai: true,
            ..ProcessingOptions::default()
        }
        .validate()
        .unwrap();
        assert_eq!(
            opts.background_strategy(),
            Some(BackgroundStrategy::Ai(AiModel::Rembg))
        );
    }

    #[test]
    fn strategy_follows_background_spec() {
        let named = ProcessingOptions {
            background: Some(BackgroundSpec::Named(NamedColor::Blue)),
            ..ProcessingOptions::default()
        };
        assert_eq!(
            named.background_strategy(),
            Some(BackgroundStrategy::Color(NamedColor::Blue.color()))
        );
        let auto = ProcessingOptions {
            background: Some(BackgroundSpec::Auto),
            ..ProcessingOptions::default()
        };
        assert_eq!(auto.background_strategy(), Some(BackgroundStrategy::Auto));
        assert_eq!(watermark_only().background_strategy(), None);
    }

    #[test]
    fn is_supported_image_accepts_common_formats() {
        assert!(is_supported_image(Path::new("photo.jpg")));
        assert!(is_supported_image(Path::new("photo.JPEG")));
        assert!(is_supported_image(Path::new("photo.png")));
        assert!(is_supported_image(Path::new("photo.webp")));
        assert!(is_supported_image(Path::new("scan.TIF")));
        assert!(is_supported_image(Path::new("photo.bmp")));
    }

    #[test]
    fn is_supported_image_rejects_unsupported_formats() {
        assert!(!is_supported_image(Path::new("photo.gif")));
        assert!(!is_supported_image(Path::new("notes.txt")));
        assert!(!is_supported_image(Path::new("photo")));
    }

    #[test]
    fn output_path_forces_png_for_background_removal() {
        let root = Path::new("/out");
        assert_eq!(
            output_path(root, Path::new("a/b.jpg"), true),
            PathBuf::from("/out/a/b.png")
        );
        assert_eq!(
            output_path(root, Path::new("a/b.jpg"), false),
            PathBuf::from("/out/a/b.jpg")
        );
        assert_eq!(
            output_path(root, Path::new("c.PNG"), true),
            PathBuf::from("/out/c.PNG")
        );
    }

    #[test]
    fn single_file_defaults_to_sibling_output_dir() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("photo.jpg");
        std::fs::write(&input, b"not decoded here").unwrap();

        let jobs = plan_jobs(&input, None, &watermark_only()).unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].output, dir.path().join("output").join("photo.jpg"));

        let explicit = dir.path().join("clean.jpg");
        let opts = ProcessingOptions {
            background: Some(BackgroundSpec::Auto),
            ..ProcessingOptions::default()
        };
        let jobs = plan_jobs(&input, Some(explicit.as_path()), &opts).unwrap();
        assert_eq!(jobs[0].output, dir.path().join("clean.png"));
    }

    #[test]
    fn missing_input_is_an_invalid_option() {
        let err = plan_jobs(Path::new("/definitely/not/here"), None, &watermark_only());
        assert!(matches!(err, Err(Error::InvalidOption(_))));
    }

    #[test]
    fn discovery_is_sorted_and_skips_output_root() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        std::fs::create_dir_all(root.join("sub")).unwrap();
        std::fs::create_dir_all(root.join("output")).unwrap();
        for name in ["b.png", "a.jpg", "sub/c.webp", "output/old.png", "notes.txt"] {
            std::fs::write(root.join(name), b"x").unwrap();
        }

        let flat = discover(root, false, None).unwrap();
        assert_eq!(flat, vec![root.join("a.jpg"), root.join("b.png")]);

        let deep = discover(root, true, Some(root.join("output").as_path())).unwrap();
        assert_eq!(
            deep,
            vec![root.join("a.jpg"), root.join("b.png"), root.join("sub/c.webp")]
        );
    }

    #[test]
    fn save_image_drops_alpha_for_jpeg() {
        let dir = tempfile::tempdir().unwrap();
        let img = RgbaImage::from_pixel(4, 4, Rgba([10, 200, 30, 128]));

        let jpg = dir.path().join("x.jpg");
        save_image(&img, &jpg, true).unwrap();
        assert!(!image::open(&jpg).unwrap().color().has_alpha());

        let png = dir.path().join("x.png");
        save_image(&img, &png, true).unwrap();
        let back = image::open(&png).unwrap().into_rgba8();
        assert_eq!(back.get_pixel(0, 0)[3], 128);
    }

    #[test]
    fn save_image_rejects_unknown_extension() {
        let dir = tempfile::tempdir().unwrap();
        let img = RgbaImage::new(2, 2);
        let err = save_image(&img, &dir.path().join("x.unknown"), true).unwrap_err();
        assert!(matches!(err, Error::UnwritableOutput { .. }));
    }

    #[test]
    fn summary_counts_failures_with_messages() {
        let results = vec![
            ProcessingResult {
                input_path: PathBuf::from("a.png"),
                output_path: PathBuf::from("out/a.png"),
                success: true,
                error: None,
            },
            ProcessingResult {
                input_path: PathBuf::from("b.png"),
                output_path: PathBuf::from("out/b.png"),
                success: false,
                error: Some(Error::AiModelUnavailable("u2net.onnx missing".to_string())),
            },
        ];
        let summary = BatchSummary::from_results(&results);
        assert_eq!(summary.succeeded, 1);
        assert_eq!(summary.total(), 2);
        assert!(!summary.all_succeeded());
        assert!(summary.failed[0].1.contains("u2net.onnx"));
        assert!(BatchSummary::default().all_succeeded());
    }
}
