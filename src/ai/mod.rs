//! Background segmentation delegated to a pretrained matting model.
//!
//! [`AiSegmenter`] owns the model handle: it loads the model the first time a
//! mask is requested, reuses it for every later image and drops it on
//! [`AiSegmenter::unload`]. A model missing from the model directory is
//! downloaded on that first load. The segmenter itself only resizes and
//! normalises the input and turns the model's confidence map into a [`Mask`];
//! inference runs behind the [`InferenceBackend`] trait (ONNX Runtime with the
//! `ai` feature).

pub mod fetch;
#[cfg(feature = "ai")]
mod http;
#[cfg(feature = "ai")]
mod onnx;

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use image::imageops::{self, FilterType};
use image::{GrayImage, Luma, RgbaImage};

use crate::error::{Error, Result};
use crate::region::{Mask, MASK_SET};

pub use fetch::{FetchError, ModelFetcher};
#[cfg(feature = "ai")]
pub use http::HttpFetcher;

/// ImageNet channel means used by both supported models.
const MEAN: [f32; 3] = [0.485, 0.456, 0.406];
/// ImageNet channel standard deviations used by both supported models.
const STD: [f32; 3] = [0.229, 0.224, 0.225];
/// Confidence above which a binary probability map marks foreground.
const FOREGROUND_THRESHOLD: u8 = 128;
/// Environment variable naming the model directory (shared with rembg).
const MODEL_HOME_ENV: &str = "U2NET_HOME";

/// The supported segmentation models.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AiModel {
    /// U²-Net salient object model as shipped by rembg (320x320 input).
    Rembg,
    /// BRIA RMBG background removal model (1024x1024 input).
    Rmbg,
}

/// How a model's output map should be read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatteKind {
    /// An unscaled soft matte; min-max normalised and kept as partial
    /// transparency.
    SoftAlpha,
    /// Foreground logits; passed through a sigmoid (unless already in `0..=1`)
    /// and kept as partial transparency.
    Logits,
    /// A foreground probability map for binary models; thresholded at 0.5.
    Probability,
}

impl AiModel {
    /// Side length of the square input the model expects.
    #[must_use]
    pub const fn input_side(self) -> u32 {
        match self {
            Self::Rembg => 320,
            Self::Rmbg => 1024,
        }
    }

    /// File name looked up in the model directory.
    #[must_use]
    pub const fn file_name(self) -> &'static str {
        match self {
            Self::Rembg => "u2net.onnx",
            Self::Rmbg => "rmbg.onnx",
        }
    }

    /// How the model's output is interpreted.
    #[must_use]
    pub const fn matte_kind(self) -> MatteKind {
        match self {
            Self::Rembg => MatteKind::SoftAlpha,
            Self::Rmbg => MatteKind::Logits,
        }
    }

    /// Where the model is fetched from when it is not on disk.
    #[must_use]
    pub const fn download_url(self) -> &'static str {
        match self {
            Self::Rembg => {
                "https://github.com/danielgatis/rembg/releases/download/v0.0.0/u2net.onnx"
            }
            Self::Rmbg => "https://huggingface.co/briaai/RMBG-2.0/resolve/main/onnx/model.onnx",
        }
    }

    /// Project page, where gated models grant access.
    #[must_use]
    pub const fn home_page(self) -> &'static str {
        match self {
            Self::Rembg => "https://github.com/danielgatis/rembg",
            Self::Rmbg => "https://huggingface.co/briaai/RMBG-2.0",
        }
    }

    /// Whether downloading needs a Hugging Face access token.
    #[must_use]
    pub const fn needs_hub_token(self) -> bool {
        matches!(self, Self::Rmbg)
    }

    /// Lowercase name as accepted on the command line.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Rembg => "rembg",
            Self::Rmbg => "rmbg",
        }
    }
}

impl FromStr for AiModel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "rembg" => Ok(Self::Rembg),
            "rmbg" => Ok(Self::Rmbg),
            other => Err(Error::InvalidOption(format!(
                "unknown AI model '{other}' (expected rembg or rmbg)"
            ))),
        }
    }
}

impl fmt::Display for AiModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Raw single-channel model output.
#[derive(Debug, Clone)]
pub struct Matte {
    /// Row-major values, `width * height` long.
    pub values: Vec<f32>,
    /// Output width.
    pub width: u32,
    /// Output height.
    pub height: u32,
}

/// A loaded model that maps a normalised image tensor to a matte.
pub trait InferenceBackend {
    /// Run the model on a `1x3xSxS` NCHW tensor with side `side`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Inference`] if the model fails or returns an
    /// unexpected output shape.
    fn infer(&mut self, input: &[f32], side: u32) -> Result<Matte>;
}

/// Loads a backend for a model file. Called at most once per successful load.
pub type BackendLoader = Box<dyn Fn(AiModel, &Path) -> Result<Box<dyn InferenceBackend>>>;

/// Lazily loaded, reusable handle to a segmentation model.
pub struct AiSegmenter {
    model: AiModel,
    matte_kind: MatteKind,
    model_path: Option<PathBuf>,
    model_dir: Option<PathBuf>,
    loader: BackendLoader,
    fetcher: Option<Box<dyn ModelFetcher>>,
    backend: Option<Box<dyn InferenceBackend>>,
}

impl fmt::Debug for AiSegmenter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AiSegmenter")
            .field("model", &self.model)
            .field("matte_kind", &self.matte_kind)
            .field("model_path", &self.model_path)
            .field("model_dir", &self.model_dir)
            .field("downloads", &self.fetcher.is_some())
            .field("loaded", &self.is_loaded())
            .finish_non_exhaustive()
    }
}

impl AiSegmenter {
    /// Create an unloaded segmenter using the built-in backend.
    ///
    /// `model_path` names the model file to load; it is never downloaded.
    /// Without it the model is looked up in [`default_model_dir`] and fetched
    /// there if missing.
    #[must_use]
    pub fn new(model: AiModel, model_path: Option<PathBuf>) -> Self {
        Self::with_loader(model, model_path, Box::new(default_loader))
    }

    /// Create an unloaded segmenter with a custom backend loader.
    #[must_use]
    pub fn with_loader(
        model: AiModel,
        model_path: Option<PathBuf>,
        loader: BackendLoader,
    ) -> Self {
        Self {
            model,
            matte_kind: model.matte_kind(),
            model_path,
            model_dir: None,
            loader,
            fetcher: default_fetcher(),
            backend: None,
        }
    }

    /// Look up (and download) the model in `dir` instead of
    /// [`default_model_dir`].
    #[must_use]
    pub fn with_model_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.model_dir = Some(dir.into());
        self
    }

    /// Download missing models with `fetcher`.
    #[must_use]
    pub fn with_fetcher(mut self, fetcher: Box<dyn ModelFetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    /// Never download; a missing model file is an error.
    #[must_use]
    pub fn without_download(mut self) -> Self {
        self.fetcher = None;
        self
    }

    /// Read the model output as `kind`, e.g. [`MatteKind::Probability`] for a
    /// custom export that should produce a hard mask.
    #[must_use]
    pub fn with_matte_kind(mut self, kind: MatteKind) -> Self {
        self.matte_kind = kind;
        self
    }

    /// The model this segmenter runs.
    #[must_use]
    pub fn model(&self) -> AiModel {
        self.model
    }

    /// Whether the model is currently loaded.
    #[must_use]
    pub fn is_loaded(&self) -> bool {
        self.backend.is_some()
    }

    /// Drop the loaded model, if any. The next [`segment`](Self::segment)
    /// loads it again.
    pub fn unload(&mut self) {
        if self.backend.take().is_some() {
            log::debug!("unloaded {} model", self.model);
        }
    }

    /// Compute the background mask of `image`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AiModelUnavailable`] if the model cannot be loaded and
    /// [`Error::Inference`] if it produces unusable output.
    pub fn segment(&mut self, image: &RgbaImage) -> Result<Mask> {
        let model = self.model;
        let side = model.input_side();
        let input = preprocess(image, model);
        let matte = self.backend()?.infer(&input, side)?;
        postprocess(&matte, self.matte_kind, image.width(), image.height())
    }

    fn backend(&mut self) -> Result<&mut Box<dyn InferenceBackend>> {
        if self.backend.is_none() {
            let path = self.model_file()?;
            log::info!("loading {} model from {}", self.model, path.display());
            self.backend = Some((self.loader)(self.model, &path)?);
        }
        self.backend
            .as_mut()
            .ok_or_else(|| Error::AiModelUnavailable(format!("{} model not loaded", self.model)))
    }

    /// Path of a model file that exists, downloading it first if needed.
    fn model_file(&self) -> Result<PathBuf> {
        if let Some(path) = &self.model_path {
            if path.is_file() {
                return Ok(path.clone());
            }
            return Err(Error::AiModelUnavailable(format!(
                "{} model not found at {}",
                self.model,
                path.display()
            )));
        }

        let dir = match &self.model_dir {
            Some(dir) => dir.clone(),
            None => default_model_dir()?,
        };
        let path = dir.join(self.model.file_name());
        if path.is_file() {
            return Ok(path);
        }
        let Some(fetcher) = self.fetcher.as_deref() else {
            return Err(Error::AiModelUnavailable(format!(
                "{} model not found at {} (downloads need the `ai` feature; place the ONNX \
                 export there or pass --model-path)",
                self.model,
                path.display()
            )));
        };
        fetch::download(fetcher, self.model, &path)?;
        Ok(path)
    }
}

/// Directory models are read from and downloaded to: `$U2NET_HOME`, falling
/// back to `~/.u2net`.
///
/// # Errors
///
/// Returns [`Error::AiModelUnavailable`] if neither location can be derived.
pub fn default_model_dir() -> Result<PathBuf> {
    std::env::var_os(MODEL_HOME_ENV)
        .map(PathBuf::from)
        .or_else(|| std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".u2net")))
        .ok_or_else(|| {
            Error::AiModelUnavailable(format!(
                "cannot locate model directory: set {MODEL_HOME_ENV} or pass --model-path"
            ))
        })
}

#[cfg(feature = "ai")]
fn default_fetcher() -> Option<Box<dyn ModelFetcher>> {
    Some(Box::new(HttpFetcher))
}

#[cfg(not(feature = "ai"))]
fn default_fetcher() -> Option<Box<dyn ModelFetcher>> {
    None
}

#[cfg(feature = "ai")]
fn default_loader(_model: AiModel, path: &Path) -> Result<Box<dyn InferenceBackend>> {
    Ok(Box::new(onnx::OnnxBackend::load(path)?))
}

#[cfg(not(feature = "ai"))]
fn default_loader(model: AiModel, _path: &Path) -> Result<Box<dyn InferenceBackend>> {
    Err(Error::AiModelUnavailable(format!(
        "{model} requires image-purifier built with the `ai` feature"
    )))
}

/// Resize to the model side and lay out as normalised NCHW floats.
///
/// rembg scales by the image's brightest channel value, RMBG by 255.
fn preprocess(image: &RgbaImage, model: AiModel) -> Vec<f32> {
    let side = model.input_side();
    let resized = imageops::resize(image, side, side, FilterType::Triangle);

    let scale = match model {
        AiModel::Rembg => {
            let brightest = resized
                .pixels()
                .flat_map(|p| [p[0], p[1], p[2]])
                .max()
                .unwrap_or(0);
            f32::from(brightest).max(1e-6)
        }
        AiModel::Rmbg => 255.0,
    };

    let plane = (side as usize) * (side as usize);
    let mut tensor = vec![0.0_f32; 3 * plane];
    for (i, px) in resized.pixels().enumerate() {
        for ch in 0..3 {
            tensor[ch * plane + i] = (f32::from(px[ch]) / scale - MEAN[ch]) / STD[ch];
        }
    }
    tensor
}

/// Turn a model matte into a background mask of `width` x `height`.
fn postprocess(matte: &Matte, kind: MatteKind, width: u32, height: u32) -> Result<Mask> {
    let expected = (matte.width as usize) * (matte.height as usize);
    if expected == 0 || matte.values.len() != expected {
        return Err(Error::Inference(format!(
            "model returned {} values for a {}x{} matte",
            matte.values.len(),
            matte.width,
            matte.height
        )));
    }

    let confidence: Vec<f32> = match kind {
        MatteKind::SoftAlpha => {
            let (lo, hi) = matte
                .values
                .iter()
                .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| {
                    (lo.min(v), hi.max(v))
                });
            let span = (hi - lo).max(1e-6);
            matte.values.iter().map(|v| (v - lo) / span).collect()
        }
        MatteKind::Logits => {
            let is_logits = matte.values.iter().any(|v| !(0.0..=1.0).contains(v));
            if is_logits {
                matte.values.iter().map(|v| 1.0 / (1.0 + (-v).exp())).collect()
            } else {
                matte.values.clone()
            }
        }
        MatteKind::Probability => matte.values.clone(),
    };

    let small = GrayImage::from_fn(matte.width, matte.height, |x, y| {
        let v = confidence[(y * matte.width + x) as usize];
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let level = (v * 255.0).round().clamp(0.0, 255.0) as u8;
        Luma([level])
    });
    let alpha = imageops::resize(&small, width, height, FilterType::Triangle);

    let mut mask = Mask::new(width, height);
    for (x, y, a) in alpha.enumerate_pixels() {
        let foreground = match kind {
            MatteKind::SoftAlpha | MatteKind::Logits => a[0],
            MatteKind::Probability if a[0] >= FOREGROUND_THRESHOLD => MASK_SET,
            MatteKind::Probability => 0,
        };
        mask.set(x, y, MASK_SET - foreground);
    }
    Ok(mask)
}
