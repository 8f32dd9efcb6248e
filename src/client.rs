use std::{
    fs::File,
    io::{Read, Write},
    path::Path,
    sync::atomic::{AtomicBool, Ordering},
    time::Duration,
};

use miette::{Context, IntoDiagnostic, Result};
use tracing::{debug, trace};

use crate::types::MetadataPayload;

/// Canonical link of an item, as shown in progress lines and written to the
/// unavailable list.
pub fn view_link(id: &str) -> String {
    format!("https://coub.com/view/{id}")
}

fn api_link(id: &str) -> String {
    format!("https://coub.com/api/v2/coubs/{id}")
}

/// Transport failure, classified for the retry policy.
#[derive(Debug)]
pub enum FetchError {
    /// Connection-level failure or malformed response body. Retryable.
    Transient(String),
    /// The shared cancellation flag was raised mid-transfer.
    Cancelled,
    /// Local I/O failure writing a stream to disk. Not retryable.
    Io(std::io::Error),
}

impl std::fmt::Display for FetchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FetchError::Transient(msg) => write!(f, "transient network failure: {msg}"),
            FetchError::Cancelled => write!(f, "transfer cancelled"),
            FetchError::Io(e) => write!(f, "could not write stream to disk: {e}"),
        }
    }
}

/// Interface to the upstream API, as far as one item is concerned.
///
/// Everything the pipeline knows about the network goes through this seam,
/// which keeps the state machine testable without a server.
pub trait CoubApi: Sync {
    /// Fetch the raw metadata payload of one item.
    fn fetch_metadata(&self, id: &str) -> std::result::Result<MetadataPayload, FetchError>;

    /// Stream the resource behind `url` into `dest`, `chunk_size` bytes at
    /// a time, checking the cancellation flag between chunks.
    fn save_stream(
        &self,
        url: &str,
        dest: &Path,
        cancel: &AtomicBool,
        chunk_size: usize,
    ) -> std::result::Result<(), FetchError>;
}

/// Shared ureq transport. Cloning shares the underlying connection pool, so
/// every pool worker holds the same agent.
#[derive(Clone)]
pub struct HttpClient {
    agent: ureq::Agent,
}

impl HttpClient {
    pub fn new() -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(Duration::from_secs(10))
            .user_agent(concat!("coubgrab/", env!("CARGO_PKG_VERSION")))
            .build();

        Self { agent }
    }

    /// Cheap reachability probe against the platform itself, run before
    /// any scheduling so a dead network fails the whole run early.
    pub fn check_connection(&self) -> Result<()> {
        self.agent
            .get("https://coub.com/")
            .call()
            .map(|_| ())
            .into_diagnostic()
            .wrap_err("Unable to connect to coub.com")
    }
}

impl CoubApi for HttpClient {
    fn fetch_metadata(&self, id: &str) -> std::result::Result<MetadataPayload, FetchError> {
        let url = api_link(id);
        debug!("Requesting metadata: {url}");

        // Missing items answer with an error body on a 4xx status; the
        // payload still has to be parsed, so status errors are not failures
        // here.
        let response = match self.agent.get(&url).call() {
            Ok(response) => response,
            Err(ureq::Error::Status(_, response)) => response,
            Err(ureq::Error::Transport(transport)) => {
                return Err(FetchError::Transient(transport.to_string()))
            }
        };

        response
            .into_json::<MetadataPayload>()
            .map_err(|e| FetchError::Transient(format!("malformed metadata body: {e}")))
    }

    fn save_stream(
        &self,
        url: &str,
        dest: &Path,
        cancel: &AtomicBool,
        chunk_size: usize,
    ) -> std::result::Result<(), FetchError> {
        trace!("Saving stream {url} to {}", dest.display());

        let response = self
            .agent
            .get(url)
            .call()
            .map_err(|e| FetchError::Transient(e.to_string()))?;

        let mut reader = response.into_reader();
        let mut file = File::create(dest).map_err(FetchError::Io)?;
        let mut chunk = vec![0u8; chunk_size];

        loop {
            if cancel.load(Ordering::Relaxed) {
                return Err(FetchError::Cancelled);
            }
            let read = reader
                .read(&mut chunk)
                .map_err(|e| FetchError::Transient(e.to_string()))?;
            if read == 0 {
                break;
            }
            file.write_all(&chunk[..read]).map_err(FetchError::Io)?;
        }

        Ok(())
    }
}
