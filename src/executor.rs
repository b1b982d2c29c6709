//! Performs one POST exchange and records the outcome as a [`SampleResult`].
//!
//! The [`SampleExecutor`] reads the selected request body file into memory, POSTs it to
//! the configured target and waits for the complete response. Only the network exchange
//! is timed. Every outcome produces a [`SampleResult`]: a response with status `200` is
//! a success, any other status is a failure that preserves the real status code and
//! message, and an error while reading the file, building the URL, connecting, sending
//! or receiving is recorded with the [`RESPONSE_CODE_EXCEPTION`] code and a diagnostic
//! trace in place of the response body.

use chrono::prelude::*;
use http::StatusCode;
use hyper::ext::ReasonPhrase;
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::backtrace::Backtrace;
use std::error::Error as StdError;
use std::time::{Duration, Instant};
use std::{fmt, io};
use url::Url;

use crate::selector::RequestBodyFile;

/// Response code recorded when the exchange itself failed, rather than the server.
pub const RESPONSE_CODE_EXCEPTION: &str = "500";

/// Content type declared for every request body.
pub const BODY_CONTENT_TYPE: &str = "application/octet-stream";

/// Data type marker: response bodies and diagnostics are always recorded as text.
pub const DATA_TYPE_TEXT: &str = "text";

/// Where samples are sent: `protocol://address` + `path`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampleTarget {
    /// Scheme, for example `http`.
    pub protocol: String,
    /// Host and port, for example `localhost:80`.
    pub address: String,
    /// Path requested on the target, for example `/testServlet`.
    pub path: String,
}
impl SampleTarget {
    pub fn new(protocol: &str, address: &str, path: &str) -> Self {
        SampleTarget {
            protocol: protocol.to_string(),
            address: address.to_string(),
            path: path.to_string(),
        }
    }

    /// Parse the full URL samples are POSTed to.
    pub fn url(&self) -> Result<Url, url::ParseError> {
        Url::parse(&format!("{}://{}{}", self.protocol, self.address, self.path))
    }
}

/// The outcome of one sample.
///
/// Created when a sample starts and fully populated when it ends, after which it is
/// handed to the caller and never modified.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleResult {
    /// Label of the worker that ran the sample, suffixed with the file name.
    pub label: String,
    /// Base name of the request body file.
    pub file_name: String,
    /// Index of the request body file in its directory listing.
    pub file_index: usize,
    /// When the exchange started, in milliseconds since the Unix epoch.
    pub start_time: i64,
    /// When the exchange ended, in milliseconds since the Unix epoch.
    pub end_time: i64,
    /// How many milliseconds the exchange took.
    pub elapsed: u64,
    /// Whether the target responded with status `200`.
    pub success: bool,
    /// Status code returned by the target, or [`RESPONSE_CODE_EXCEPTION`].
    pub response_code: String,
    /// Reason phrase sent by the target, or a description of the failure.
    pub response_message: String,
    /// Whether the exchange failed on the client side, rather than with a response.
    #[serde(default)]
    pub exception: bool,
    /// Response body, or the diagnostic trace of the failure.
    pub response_body: String,
    /// Always [`DATA_TYPE_TEXT`].
    pub data_type: String,
}
impl SampleResult {
    pub(crate) fn new(label: &str, file: &RequestBodyFile) -> Self {
        let file_name = file.file_name();
        SampleResult {
            label: format!("{} - {}", label, file_name),
            file_name,
            file_index: file.index(),
            start_time: 0,
            end_time: 0,
            elapsed: 0,
            success: false,
            response_code: "".to_string(),
            response_message: "".to_string(),
            exception: false,
            response_body: "".to_string(),
            data_type: DATA_TYPE_TEXT.to_string(),
        }
    }

    // Record the start of the timed window.
    fn sample_start(&mut self) -> Instant {
        self.start_time = Utc::now().timestamp_millis();
        Instant::now()
    }

    // Close the timed window. The end is derived from the monotonic clock so it can
    // never precede the start, even if the system clock moves backwards.
    fn sample_end(&mut self, elapsed: Duration) {
        self.elapsed = elapsed.as_millis() as u64;
        self.end_time = self.start_time + self.elapsed as i64;
    }

    fn set_response(&mut self, response: ExchangeResponse) {
        self.success = response.status_code == StatusCode::OK;
        self.response_code = response.status_code.as_u16().to_string();
        self.response_message = response.reason;
        self.response_body = response.body;
    }

    fn set_exception(&mut self, error: &ExchangeError) {
        self.success = false;
        self.exception = true;
        self.response_code = RESPONSE_CODE_EXCEPTION.to_string();
        self.response_message = format!("Exception: {}", error);
        self.response_body = error.diagnostics();
    }
}

/// All the ways an exchange can fail on the client side.
#[derive(Debug)]
pub enum ExchangeError {
    /// Failed to read the request body file.
    Io(io::Error),
    /// The configured target doesn't form a valid URL.
    Url(url::ParseError),
    /// Failed to connect, send the request, or receive the response.
    Reqwest(reqwest::Error),
}
impl ExchangeError {
    fn describe(&self) -> &str {
        match *self {
            ExchangeError::Io(_) => "std::io::Error",
            ExchangeError::Url(_) => "url::ParseError",
            ExchangeError::Reqwest(_) => "reqwest::Error",
        }
    }

    fn inner(&self) -> &(dyn StdError + 'static) {
        match *self {
            ExchangeError::Io(ref source) => source,
            ExchangeError::Url(ref source) => source,
            ExchangeError::Reqwest(ref source) => source,
        }
    }

    /// Formats the error type, message, chain of causes, debug representation and a
    /// backtrace into a trace operators can inspect after the load test.
    pub fn diagnostics(&self) -> String {
        let mut trace = format!("{}: {}\n", self.describe(), self.inner());
        let mut cause = self.inner().source();
        while let Some(source) = cause {
            trace.push_str(&format!("\tcaused by: {}\n", source));
            cause = source.source();
        }
        trace.push_str(&format!("{:#?}\n", self.inner()));
        trace.push_str(&format!("stack backtrace:\n{}\n", Backtrace::force_capture()));
        trace
    }
}

impl fmt::Display for ExchangeError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}: {}", self.describe(), self.inner())
    }
}

impl StdError for ExchangeError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        Some(self.inner())
    }
}

impl From<io::Error> for ExchangeError {
    fn from(err: io::Error) -> ExchangeError {
        ExchangeError::Io(err)
    }
}

impl From<url::ParseError> for ExchangeError {
    fn from(err: url::ParseError) -> ExchangeError {
        ExchangeError::Url(err)
    }
}

impl From<reqwest::Error> for ExchangeError {
    fn from(err: reqwest::Error) -> ExchangeError {
        ExchangeError::Reqwest(err)
    }
}

/// What the target answered.
#[derive(Debug)]
struct ExchangeResponse {
    status_code: StatusCode,
    /// The reason phrase as sent, falling back to the canonical one.
    reason: String,
    body: String,
}

/// POSTs request body files to a [`SampleTarget`].
///
/// Holds no mutable state, so a single executor can be shared by any number of
/// concurrent workers.
#[derive(Debug, Clone)]
pub struct SampleExecutor {
    client: Client,
    target: SampleTarget,
}
impl SampleExecutor {
    pub fn new(client: Client, target: SampleTarget) -> Self {
        SampleExecutor { client, target }
    }

    pub fn target(&self) -> &SampleTarget {
        &self.target
    }

    /// POST the contents of `file` to the target and record the outcome.
    ///
    /// Never fails: errors are recorded in the returned [`SampleResult`].
    pub async fn execute(&self, file: &RequestBodyFile, label: &str) -> SampleResult {
        let mut result = SampleResult::new(label, file);

        // The file is read before the timer starts.
        let data = match tokio::fs::read(file.path()).await {
            Ok(data) => data,
            Err(e) => {
                // Nothing was exchanged, so the timed window is empty.
                result.sample_start();
                result.sample_end(Duration::ZERO);
                let error = ExchangeError::from(e);
                warn!("{}: {}", file.path().display(), error);
                result.set_exception(&error);
                return result;
            }
        };

        let started = result.sample_start();
        let response = self.exchange(data).await;
        result.sample_end(started.elapsed());

        match response {
            Ok(response) => {
                debug!("{}: status_code {}", result.label, response.status_code);
                result.set_response(response);
            }
            Err(error) => {
                warn!("{}: {}", result.label, error);
                result.set_exception(&error);
            }
        }

        result
    }

    // Send the request and read the complete response body. The response, and with it
    // the connection, is dropped on every path out of this function.
    async fn exchange(&self, data: Vec<u8>) -> Result<ExchangeResponse, ExchangeError> {
        let url = self.target.url()?;
        let content_length = data.len();
        let response = self
            .client
            .post(url)
            .header(CONTENT_TYPE, BODY_CONTENT_TYPE)
            .header(CONTENT_LENGTH, content_length)
            .body(data)
            .send()
            .await?;
        let status_code = response.status();
        // Only a reason phrase that differs from the canonical one is kept as an extension.
        let reason = match response.extensions().get::<ReasonPhrase>() {
            Some(reason) => String::from_utf8_lossy(reason.as_bytes()).into_owned(),
            None => status_code
                .canonical_reason()
                .unwrap_or_default()
                .to_string(),
        };
        let body = response.text().await?;
        Ok(ExchangeResponse {
            status_code,
            reason,
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use httpmock::{Method::POST, MockServer};
    use std::path::PathBuf;

    fn body_file(dir: &tempfile::TempDir, name: &str, contents: &[u8]) -> RequestBodyFile {
        let path = dir.path().join(name);
        std::fs::write(&path, contents).expect("failed to write request body");
        RequestBodyFile::new(path, 0)
    }

    fn executor(server: &MockServer, path: &str) -> SampleExecutor {
        SampleExecutor::new(
            Client::new(),
            SampleTarget::new("http", &server.address().to_string(), path),
        )
    }

    #[test]
    fn target_url() {
        let target = SampleTarget::new("http", "localhost:80", "/testServlet");
        assert_eq!(
            target.url().unwrap().as_str(),
            "http://localhost:80/testServlet"
        );
        let target = SampleTarget::new("https", "example.com:8443", "/a/b");
        assert_eq!(target.url().unwrap().as_str(), "https://example.com:8443/a/b");
        assert!(SampleTarget::new("http", "", "/").url().is_err());
    }

    #[tokio::test]
    async fn successful_exchange() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST)
                .path("/testServlet")
                .header("content-type", BODY_CONTENT_TYPE)
                .header("content-length", "11")
                .body("hello world");
            then.status(200).body("accepted");
        });

        let dir = tempfile::tempdir().unwrap();
        let file = body_file(&dir, "hello.bin", b"hello world");
        let result = executor(&server, "/testServlet")
            .execute(&file, "Thread Group 1-1")
            .await;

        mock.assert();
        assert!(result.success);
        assert_eq!(result.response_code, "200");
        assert_eq!(result.response_message, "OK");
        assert_eq!(result.response_body, "accepted");
        assert!(!result.exception);
        assert_eq!(result.label, "Thread Group 1-1 - hello.bin");
        assert_eq!(result.file_name, "hello.bin");
        assert_eq!(result.data_type, DATA_TYPE_TEXT);
        assert!(result.end_time >= result.start_time);
    }

    #[tokio::test]
    async fn non_200_is_failure() {
        let server = MockServer::start();
        let not_found = server.mock(|when, then| {
            when.method(POST).path("/missing");
            then.status(404).body("no such servlet");
        });
        let created = server.mock(|when, then| {
            when.method(POST).path("/created");
            then.status(201);
        });

        let dir = tempfile::tempdir().unwrap();
        let file = body_file(&dir, "body.bin", &[0, 1, 2, 3]);

        let result = executor(&server, "/missing").execute(&file, "user").await;
        not_found.assert();
        assert!(!result.success);
        assert_eq!(result.response_code, "404");
        assert_eq!(result.response_message, "Not Found");
        assert_eq!(result.response_body, "no such servlet");

        // Only exactly 200 is a success.
        let result = executor(&server, "/created").execute(&file, "user").await;
        created.assert();
        assert!(!result.success);
        assert_eq!(result.response_code, "201");
    }

    #[tokio::test]
    async fn server_error_is_not_exception() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST).path("/testServlet");
            then.status(500).body("boom");
        });

        let dir = tempfile::tempdir().unwrap();
        let file = body_file(&dir, "body.bin", b"payload");
        let result = executor(&server, "/testServlet").execute(&file, "user").await;

        mock.assert();
        assert!(!result.success);
        assert!(!result.exception);
        assert_eq!(result.response_code, "500");
        assert_eq!(result.response_message, "Internal Server Error");
        assert_eq!(result.response_body, "boom");
    }

    #[tokio::test]
    async fn custom_reason_phrase() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            // Read until the end of the request body.
            let mut request = Vec::new();
            let mut buf = [0u8; 1024];
            while !request.ends_with(b"payload") {
                let read = stream.read(&mut buf).await.unwrap();
                if read == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..read]);
            }
            stream
                .write_all(
                    b"HTTP/1.1 599 Backend Overloaded\r\nContent-Length: 4\r\nConnection: close\r\n\r\nbusy",
                )
                .await
                .unwrap();
            stream.shutdown().await.unwrap();
        });

        let dir = tempfile::tempdir().unwrap();
        let file = body_file(&dir, "body.bin", b"payload");
        let result = SampleExecutor::new(Client::new(), SampleTarget::new("http", &address, "/"))
            .execute(&file, "user")
            .await;
        server.await.unwrap();

        assert!(!result.success);
        assert!(!result.exception);
        assert_eq!(result.response_code, "599");
        assert_eq!(result.response_message, "Backend Overloaded");
        assert_eq!(result.response_body, "busy");
    }

    #[tokio::test]
    async fn connection_refused() {
        // Bind and drop a listener to find a port nothing listens on.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let address = listener.local_addr().unwrap().to_string();
        drop(listener);

        let dir = tempfile::tempdir().unwrap();
        let file = body_file(&dir, "body.bin", b"payload");
        let result = SampleExecutor::new(Client::new(), SampleTarget::new("http", &address, "/"))
            .execute(&file, "user")
            .await;

        assert!(!result.success);
        assert_eq!(result.response_code, RESPONSE_CODE_EXCEPTION);
        assert!(result.response_message.starts_with("Exception: "));
        assert!(result.exception);
        assert!(result.response_body.starts_with("reqwest::Error"));
        assert!(result.response_body.contains("stack backtrace:"));
        assert!(result.end_time >= result.start_time);
    }

    #[tokio::test]
    async fn malformed_url() {
        let dir = tempfile::tempdir().unwrap();
        let file = body_file(&dir, "body.bin", b"payload");
        let result =
            SampleExecutor::new(Client::new(), SampleTarget::new("http", "bad host:80", "/"))
                .execute(&file, "user")
                .await;

        assert!(!result.success);
        assert_eq!(result.response_code, RESPONSE_CODE_EXCEPTION);
        assert!(result.response_body.starts_with("url::ParseError"));
    }

    #[tokio::test]
    async fn unreadable_file() {
        let file = RequestBodyFile::new(PathBuf::from("/nonexistent/request.bin"), 3);
        let result =
            SampleExecutor::new(Client::new(), SampleTarget::new("http", "localhost:1", "/"))
                .execute(&file, "user")
                .await;

        assert!(!result.success);
        assert_eq!(result.response_code, RESPONSE_CODE_EXCEPTION);
        assert_eq!(result.file_index, 3);
        assert!(result.response_body.starts_with("std::io::Error"));
        assert_eq!(result.start_time, result.end_time);
    }
}
