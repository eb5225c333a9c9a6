// Retrieval module
// Turns a locator into raw bytes, over HTTP or from local storage

use crate::error::TaskError;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Locator prefixes that select a network fetch
const NETWORK_SCHEMES: [&str; 2] = ["http://", "https://"];

/// Status code and body of an HTTP GET
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// HTTP GET abstraction so retrieval can be stubbed in tests
pub trait HttpClient: Send + Sync {
    /// Perform a GET. Transport failures are errors; any status is a response.
    fn get(&self, url: &str) -> Result<HttpResponse, TaskError>;
}

/// Blocking reqwest client, used from pool workers
#[derive(Debug, Clone)]
pub struct ReqwestClient {
    client: reqwest::blocking::Client,
}

impl ReqwestClient {
    /// Build a client. `None` leaves requests without a client-side timeout.
    pub fn new(timeout: Option<Duration>) -> reqwest::Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()?;
        Ok(Self { client })
    }
}

impl HttpClient for ReqwestClient {
    fn get(&self, url: &str) -> Result<HttpResponse, TaskError> {
        let response = self.client.get(url).send().map_err(|e| TaskError::Request {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

        let status = response.status().as_u16();
        if !response.status().is_success() {
            // Body of an error page is never decoded
            return Ok(HttpResponse {
                status,
                body: Vec::new(),
            });
        }

        let body = response.bytes().map_err(|e| TaskError::Request {
            url: url.to_string(),
            reason: format!("failed to read response: {}", e),
        })?;

        Ok(HttpResponse {
            status,
            body: body.to_vec(),
        })
    }
}

/// Retrieve the bytes a locator refers to
pub trait Fetcher: Send + Sync {
    fn fetch(&self, locator: &str) -> Result<Vec<u8>, TaskError>;
}

impl<F: Fetcher + ?Sized> Fetcher for Arc<F> {
    fn fetch(&self, locator: &str) -> Result<Vec<u8>, TaskError> {
        (**self).fetch(locator)
    }
}

/// Does this locator name a network resource
pub fn is_network_locator(locator: &str) -> bool {
    NETWORK_SCHEMES.iter().any(|scheme| {
        locator
            .get(..scheme.len())
            .is_some_and(|prefix| prefix.eq_ignore_ascii_case(scheme))
    })
}

/// Default retrieval policy: HTTP for network locators, the filesystem otherwise
#[derive(Debug, Clone)]
pub struct SourceFetcher<C = ReqwestClient> {
    http: C,
    root: Option<PathBuf>,
}

impl<C: HttpClient> SourceFetcher<C> {
    pub fn new(http: C) -> Self {
        Self { http, root: None }
    }

    /// Resolve relative local locators against `root`
    pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.root = Some(root.into());
        self
    }

    /// Filesystem path a local locator refers to
    pub fn local_path(&self, locator: &str) -> PathBuf {
        let path = Path::new(locator);
        match &self.root {
            Some(root) if path.is_relative() => root.join(path),
            _ => path.to_path_buf(),
        }
    }
}

impl<C: HttpClient> Fetcher for SourceFetcher<C> {
    fn fetch(&self, locator: &str) -> Result<Vec<u8>, TaskError> {
        if is_network_locator(locator) {
            let response = self.http.get(locator)?;
            if !response.is_success() {
                return Err(TaskError::Status {
                    url: locator.to_string(),
                    status: response.status,
                });
            }
            Ok(response.body)
        } else {
            let path = self.local_path(locator);
            fs::read(&path).map_err(|source| TaskError::Io { path, source })
        }
    }
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use parking_lot::Mutex;

    /// Stub HTTP client returning a fixed response and recording requested URLs
    pub struct MockHttpClient {
        pub status: u16,
        pub body: Vec<u8>,
        pub requests: Mutex<Vec<String>>,
    }

    impl MockHttpClient {
        pub fn new(status: u16, body: Vec<u8>) -> Self {
            Self {
                status,
                body,
                requests: Mutex::new(Vec::new()),
            }
        }
    }

    impl HttpClient for MockHttpClient {
        fn get(&self, url: &str) -> Result<HttpResponse, TaskError> {
            self.requests.lock().push(url.to_string());
            Ok(HttpResponse {
                status: self.status,
                body: self.body.clone(),
            })
        }
    }

    #[test]
    fn test_network_locator_detection() {
        assert!(is_network_locator("http://example.invalid/a.jpg"));
        assert!(is_network_locator("HTTPS://example.invalid/a.jpg"));
        assert!(!is_network_locator("image/level1.jpg"));
        assert!(!is_network_locator("httpdocs/a.jpg"));
        assert!(!is_network_locator("ftp://example.invalid/a.jpg"));
        assert!(!is_network_locator(""));
    }

    #[test]
    fn test_http_success_returns_body() {
        let fetcher = SourceFetcher::new(MockHttpClient::new(200, vec![1, 2, 3]));
        let bytes = fetcher.fetch("http://example.invalid/ok.jpg").unwrap();
        assert_eq!(bytes, vec![1, 2, 3]);
        assert_eq!(
            *fetcher.http.requests.lock(),
            vec!["http://example.invalid/ok.jpg".to_string()]
        );
    }

    #[test]
    fn test_http_error_status() {
        let fetcher = SourceFetcher::new(MockHttpClient::new(404, b"not found".to_vec()));
        let err = fetcher.fetch("http://example.invalid/missing.jpg").unwrap_err();
        assert!(matches!(err, TaskError::Status { status: 404, .. }));
    }

    #[test]
    fn test_local_read_uses_root() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("image")).unwrap();
        fs::write(dir.path().join("image/a.bin"), b"abc").unwrap();

        let fetcher = SourceFetcher::new(MockHttpClient::new(500, Vec::new())).with_root(dir.path());
        assert_eq!(fetcher.fetch("image/a.bin").unwrap(), b"abc".to_vec());
        assert!(fetcher.http.requests.lock().is_empty());
    }

    #[test]
    fn test_absolute_path_ignores_root() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("abs.bin");
        fs::write(&file, b"xyz").unwrap();

        let fetcher = SourceFetcher::new(MockHttpClient::new(200, Vec::new())).with_root("/nonexistent");
        assert_eq!(fetcher.local_path(file.to_str().unwrap()), file);
        assert_eq!(fetcher.fetch(file.to_str().unwrap()).unwrap(), b"xyz".to_vec());
    }

    #[test]
    fn test_missing_local_file() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = SourceFetcher::new(MockHttpClient::new(200, Vec::new())).with_root(dir.path());
        let err = fetcher.fetch("image/nope.jpg").unwrap_err();
        assert!(matches!(err, TaskError::Io { .. }));
    }
}
