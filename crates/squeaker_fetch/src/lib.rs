//! Blocking fetcher for `http(s)://` and `file://` stage URLs.

use std::io::Write;
use std::time::Duration;

use squeaker_cache::{FetchStageError, UrlFetcher};

const DEFAULT_USER_AGENT: &str = concat!("squeaker", "/", env!("CARGO_PKG_VERSION"));

/// A client that fetches `url:` stage bodies over HTTP(S) or directly from
/// disk for `file:` URLs. There is no retry middleware: the resolver's
/// content-addressed cache means a failed fetch is simply retried by the
/// caller on the next invocation.
pub struct HttpFetcher {
    client: reqwest::blocking::Client,
}

impl HttpFetcher {
    pub fn new() -> Self {
        Self::with_timeout(Duration::from_secs(5 * 60))
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        let client = reqwest::blocking::Client::builder()
            .user_agent(DEFAULT_USER_AGENT)
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::blocking::Client::new());
        Self { client }
    }
}

impl Default for HttpFetcher {
    fn default() -> Self {
        Self::new()
    }
}

impl UrlFetcher for HttpFetcher {
    fn fetch_to(&self, url: &str, dest: &mut dyn Write) -> Result<(), FetchStageError> {
        if let Ok(parsed) = url::Url::parse(url) {
            if let Ok(path) = parsed.to_file_path() {
                tracing::debug!(url, path = %path.display(), "reading file: url directly");
                let display = path.display().to_string();
                let mut file = fs_err::File::open(&path)
                    .map_err(|e| FetchStageError::FileUnreadable(display.clone(), e))?;
                std::io::copy(&mut file, dest)
                    .map_err(|e| FetchStageError::FileUnreadable(display, e))?;
                return Ok(());
            }
        }

        tracing::debug!(url, "fetching over http(s)");
        let mut response =
            self.client
                .get(url)
                .send()
                .map_err(|e| FetchStageError::Transport {
                    url: url.to_string(),
                    message: e.to_string(),
                })?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            tracing::warn!(url, status, "fetch failed with non-2xx status");
            let headers = response
                .headers()
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_str().unwrap_or_default().to_string()))
                .collect();
            return Err(FetchStageError::BadStatus {
                url: url.to_string(),
                status,
                headers,
            });
        }

        response
            .copy_to(dest)
            .map_err(|e| FetchStageError::Transport {
                url: url.to_string(),
                message: e.to_string(),
            })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fetch_to_reads_file_url() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("body.txt");
        fs_err::write(&path, b"hello").unwrap();

        let fetcher = HttpFetcher::new();
        let mut buf = Vec::new();
        fetcher
            .fetch_to(&format!("file:{}", path.display()), &mut buf)
            .unwrap();
        assert_eq!(buf, b"hello");
    }

    #[test]
    fn fetch_to_reports_unreadable_file() {
        let fetcher = HttpFetcher::new();
        let mut buf = Vec::new();
        let err = fetcher
            .fetch_to("file:/does/not/exist", &mut buf)
            .unwrap_err();
        assert!(matches!(err, FetchStageError::FileUnreadable(_, _)));
    }
}
