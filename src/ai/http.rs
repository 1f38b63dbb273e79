//! Blocking HTTP transport for model downloads.

use std::io::Write;
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::StatusCode;

use super::fetch::{FetchError, ModelFetcher};

const USER_AGENT: &str = concat!("image-purifier/", env!("CARGO_PKG_VERSION"));
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
/// Whole-transfer limit; the RMBG export is close to 1 GB.
const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(1800);

/// Downloads over HTTPS with `reqwest`, following redirects.
#[derive(Debug, Default, Clone, Copy)]
pub struct HttpFetcher;

impl ModelFetcher for HttpFetcher {
    fn fetch(
        &self,
        url: &str,
        token: Option<&str>,
        dest: &mut dyn Write,
    ) -> Result<u64, FetchError> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(DOWNLOAD_TIMEOUT)
            .build()
            .map_err(|e| FetchError::Network(e.to_string()))?;

        let mut request = client.get(url);
        if let Some(token) = token {
            request = request.bearer_auth(token);
        }
        let mut response = request
            .send()
            .map_err(|e| FetchError::Network(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(FetchError::Unauthorized(status.as_u16()));
        }
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }
        log::debug!(
            "GET {url}: {status}, {} bytes announced",
            response
                .content_length()
                .map_or_else(|| "unknown".to_string(), |n| n.to_string())
        );

        response
            .copy_to(dest)
            .map_err(|e| FetchError::Network(e.to_string()))
    }
}
