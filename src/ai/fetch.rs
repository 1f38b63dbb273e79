//! First-use model download.
//!
//! The transport sits behind [`ModelFetcher`] so the segmenter can be driven
//! without network access. Bytes are streamed to `<file>.part` and renamed into
//! place once complete, so an interrupted download never leaves a truncated
//! model where the loader would pick it up.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;

use super::AiModel;
use crate::error::{Error, Result};

/// Environment variables checked, in order, for a Hugging Face access token.
pub const HUB_TOKEN_ENV: [&str; 2] = ["HF_TOKEN", "HUGGING_FACE_HUB_TOKEN"];

/// Transport failure reported by a [`ModelFetcher`].
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// The server refused access (HTTP 401 or 403).
    #[error("access denied (HTTP {0})")]
    Unauthorized(u16),

    /// Any other non-success HTTP status.
    #[error("server answered HTTP {0}")]
    Status(u16),

    /// Connection, TLS or transfer failure.
    #[error("network error: {0}")]
    Network(String),

    /// Writing the downloaded bytes failed.
    #[error("cannot write model file: {0}")]
    Write(#[from] std::io::Error),
}

/// Streams the body at `url` into `dest`.
pub trait ModelFetcher {
    /// Fetch `url`, sending `token` as a bearer token when given, and return
    /// the number of bytes written.
    ///
    /// # Errors
    ///
    /// Returns a [`FetchError`] describing why the transfer failed.
    fn fetch(
        &self,
        url: &str,
        token: Option<&str>,
        dest: &mut dyn Write,
    ) -> std::result::Result<u64, FetchError>;
}

/// The Hugging Face token from the environment, if one is set and non-empty.
#[must_use]
pub fn hub_token() -> Option<String> {
    hub_token_from(|name| std::env::var(name).ok())
}

fn hub_token_from(lookup: impl Fn(&str) -> Option<String>) -> Option<String> {
    HUB_TOKEN_ENV
        .iter()
        .filter_map(|name| lookup(name))
        .map(|token| token.trim().to_string())
        .find(|token| !token.is_empty())
}

/// Download `model` to `dest`, creating its directory first.
pub(crate) fn download(fetcher: &dyn ModelFetcher, model: AiModel, dest: &Path) -> Result<()> {
    if let Some(dir) = dest.parent() {
        fs::create_dir_all(dir).map_err(|e| {
            Error::AiModelUnavailable(format!(
                "cannot create model directory {}: {e}",
                dir.display()
            ))
        })?;
    }

    let token = if model.needs_hub_token() {
        hub_token()
    } else {
        None
    };
    let url = model.download_url();
    let partial = dest.with_extension("onnx.part");
    log::info!("downloading {model} model from {url} to {}", dest.display());

    let fetched = File::create(&partial)
        .map_err(FetchError::from)
        .and_then(|file| {
            let mut out = BufWriter::new(file);
            let bytes = fetcher.fetch(url, token.as_deref(), &mut out)?;
            out.flush()?;
            Ok(bytes)
        });

    match fetched {
        Ok(bytes) => {
            fs::rename(&partial, dest).map_err(|e| {
                Error::AiModelUnavailable(format!(
                    "cannot move downloaded model to {}: {e}",
                    dest.display()
                ))
            })?;
            log::info!("downloaded {model} model ({bytes} bytes)");
            Ok(())
        }
        Err(e) => {
            // The partial file is useless whatever went wrong.
            let _ = fs::remove_file(&partial);
            Err(fetch_error(model, &e, token.is_some()))
        }
    }
}

/// Explain a failed download as [`Error::AiModelUnavailable`].
pub(crate) fn fetch_error(model: AiModel, err: &FetchError, has_token: bool) -> Error {
    let url = model.download_url();
    let message = match err {
        FetchError::Unauthorized(_) if model.needs_hub_token() && !has_token => format!(
            "{model} model is gated: accept its license at {} and set {} or {} \
             to an access token",
            model.home_page(),
            HUB_TOKEN_ENV[0],
            HUB_TOKEN_ENV[1]
        ),
        FetchError::Unauthorized(code) if model.needs_hub_token() => format!(
            "{model} download refused (HTTP {code}): the token in {} / {} has no access \
             to {}",
            HUB_TOKEN_ENV[0],
            HUB_TOKEN_ENV[1],
            model.home_page()
        ),
        other => format!("{model} download from {url} failed: {other}"),
    };
    Error::AiModelUnavailable(format!("{message} (or pass --model-path)"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn first_non_empty_token_wins() {
        let env: HashMap<&str, &str> = [("HF_TOKEN", "  "), ("HUGGING_FACE_HUB_TOKEN", "hf_abc")]
            .into_iter()
            .collect();
        let token = hub_token_from(|name| env.get(name).map(ToString::to_string));
        assert_eq!(token.as_deref(), Some("hf_abc"));

        let none = hub_token_from(|_| None);
        assert!(none.is_none());
    }

    #[test]
    fn gated_model_without_token_asks_for_one() {
        let err = fetch_error(AiModel::Rmbg, &FetchError::Unauthorized(401), false);
        let Error::AiModelUnavailable(msg) = err else {
            panic!("expected AiModelUnavailable");
        };
        assert!(msg.contains("HF_TOKEN"), "{msg}");
        assert!(msg.contains("HUGGING_FACE_HUB_TOKEN"), "{msg}");
        assert!(msg.contains("huggingface.co/briaai"), "{msg}");
    }

    #[test]
    fn refused_token_is_reported_as_such() {
        let err = fetch_error(AiModel::Rmbg, &FetchError::Unauthorized(403), true);
        assert!(err.to_string().contains("HTTP 403"));
        assert!(err.to_string().contains("no access"));
    }

    #[test]
    fn network_and_status_failures_are_unavailable() {
        let offline = fetch_error(
            AiModel::Rembg,
            &FetchError::Network("dns error".into()),
            false,
        );
        assert!(matches!(offline, Error::AiModelUnavailable(_)));
        assert!(offline.to_string().contains("dns error"));
        assert!(!offline.is_fatal());

        let missing = fetch_error(AiModel::Rembg, &FetchError::Status(404), false);
        assert!(missing.to_string().contains("HTTP 404"));
        assert!(missing.to_string().contains("u2net.onnx"));
    }
}
