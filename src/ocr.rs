//! Client for the Azure Computer Vision Read API (v3.2).
//!
//! Reading is a two-step protocol: the document is submitted and the service
//! answers with an `Operation-Location` URL, which is then polled until the
//! analysis reaches a terminal status.

use anyhow::{Context, Result};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::debug;

use crate::transcript::Transcript;

const SUBSCRIPTION_KEY_HEADER: &str = "Ocp-Apim-Subscription-Key";
const OPERATION_LOCATION_HEADER: &str = "Operation-Location";
const ANALYZE_PATH: &str = "/vision/v3.2/read/analyze";
/// Upper bound on a single wait, as a multiple of the base poll interval.
const MAX_BACKOFF_FACTOR: u32 = 8;

#[derive(Debug, Error)]
pub enum OcrError {
    #[error("OCR analysis failed")]
    AnalysisFailed,
    #[error("OCR analysis timed out after {0:?}")]
    Timeout(Duration),
    #[error("OCR service response has no Operation-Location header")]
    MissingOperationLocation,
    #[error("OCR service error {status}: {body}")]
    Http { status: StatusCode, body: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadStatus {
    NotStarted,
    Running,
    Succeeded,
    Failed,
}

impl ReadStatus {
    /// Unknown or missing statuses are treated as still running.
    pub fn parse(s: Option<&str>) -> Self {
        match s {
            Some("succeeded") => ReadStatus::Succeeded,
            Some("failed") => ReadStatus::Failed,
            Some("notStarted") => ReadStatus::NotStarted,
            _ => ReadStatus::Running,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PollPolicy {
    pub interval: Duration,
    pub timeout: Duration,
}

impl PollPolicy {
    /// Wait before poll number `attempt` (0-based): the base interval doubled
    /// per attempt, capped.
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt).min(MAX_BACKOFF_FACTOR);
        self.interval.saturating_mul(factor)
    }
}

/// A finished read: the raw body as returned by the service plus its parsed
/// transcript.
#[derive(Debug, Clone)]
pub struct ReadOutcome {
    pub raw: String,
    pub transcript: Transcript,
}

pub struct ReadClient {
    http: Client,
    endpoint: String,
    key: String,
    policy: PollPolicy,
}

#[derive(Deserialize)]
struct StatusOnly {
    status: Option<String>,
}

impl ReadClient {
    pub fn new(endpoint: &str, key: &str, policy: PollPolicy, request_timeout: Duration) -> Result<Self> {
        let http = Client::builder().timeout(request_timeout).build()?;
        Ok(Self {
            http,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            key: key.to_string(),
            policy,
        })
    }

    pub async fn read_document(&self, pdf: Vec<u8>) -> Result<ReadOutcome> {
        let operation_url = self.submit(pdf).await?;
        self.wait_for_result(&operation_url).await
    }

    async fn submit(&self, pdf: Vec<u8>) -> Result<String> {
        let url = format!("{}{}", self.endpoint, ANALYZE_PATH);
        let res = self
            .http
            .post(&url)
            .query(&[("readingOrder", "natural")])
            .header(SUBSCRIPTION_KEY_HEADER, &self.key)
            .header(reqwest::header::CONTENT_TYPE, "application/pdf")
            .body(pdf)
            .send()
            .await
            .context("network error submitting document to OCR service")?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(OcrError::Http { status, body }.into());
        }
        let location = res
            .headers()
            .get(OPERATION_LOCATION_HEADER)
            .and_then(|v| v.to_str().ok())
            .ok_or(OcrError::MissingOperationLocation)?;
        Ok(location.to_string())
    }

    async fn wait_for_result(&self, operation_url: &str) -> Result<ReadOutcome> {
        let started = Instant::now();
        let deadline = started + self.policy.timeout;
        let mut attempt = 0u32;
        loop {
            let res = self
                .http
                .get(operation_url)
                .header(SUBSCRIPTION_KEY_HEADER, &self.key)
                .send()
                .await
                .context("network error polling OCR result")?;
            if !res.status().is_success() {
                let status = res.status();
                let body = res.text().await.unwrap_or_default();
                return Err(OcrError::Http { status, body }.into());
            }
            let raw = res.text().await.context("reading OCR result body")?;
            let status: StatusOnly = serde_json::from_str(&raw).context("failed to parse OCR status JSON")?;
            let status = ReadStatus::parse(status.status.as_deref());
            debug!(?status, attempt, "polled OCR operation");
            match status {
                ReadStatus::Succeeded => {
                    let transcript = Transcript::from_json(&raw)?;
                    return Ok(ReadOutcome { raw, transcript });
                }
                ReadStatus::Failed => return Err(OcrError::AnalysisFailed.into()),
                ReadStatus::NotStarted | ReadStatus::Running => {}
            }
            // request time counts against the deadline, not only the sleeps
            let delay = self.policy.delay(attempt);
            if Instant::now() + delay >= deadline {
                return Err(OcrError::Timeout(started.elapsed()).into());
            }
            tokio::time::sleep(delay).await;
            attempt = attempt.saturating_add(1);
        }
    }
}

/// A local stand-in for the Read API: `POST` answers with an
/// `Operation-Location`, every `GET` answers with the next status in line
/// (the last one repeats).
#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    pub const SUCCEEDED_BODY: &str = r#"{"status":"succeeded","analyzeResult":{"readResults":[{"page":1,"lines":[{"text":"7"},{"text":"GAZETTE NOTICE NO. 1: THE LAND ACT"}]}]}}"#;

    pub struct ReadStub {
        pub endpoint: String,
        polls: Arc<AtomicUsize>,
    }

    impl ReadStub {
        pub fn polls(&self) -> usize {
            self.polls.load(Ordering::SeqCst)
        }
    }

    pub async fn spawn(statuses: &[&'static str]) -> ReadStub {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let endpoint = format!("http://{}", listener.local_addr().unwrap());
        let polls = Arc::new(AtomicUsize::new(0));
        let statuses: Arc<Vec<&'static str>> = Arc::new(statuses.to_vec());
        let (base, counter) = (endpoint.clone(), polls.clone());
        tokio::spawn(async move {
            while let Ok((mut sock, _)) = listener.accept().await {
                let (base, counter, statuses) = (base.clone(), counter.clone(), statuses.clone());
                tokio::spawn(async move {
                    let head = read_request(&mut sock).await;
                    let response = if head.starts_with("POST") {
                        format!(
                            "HTTP/1.1 202 Accepted\r\nOperation-Location: {}/operations/1\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
                            base
                        )
                    } else {
                        let n = counter.fetch_add(1, Ordering::SeqCst);
                        let status = statuses[n.min(statuses.len() - 1)];
                        let body = if status == "succeeded" {
                            SUCCEEDED_BODY.to_string()
                        } else {
                            format!(r#"{{"status":"{}"}}"#, status)
                        };
                        format!(
                            "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                            body.len(),
                            body
                        )
                    };
                    let _ = sock.write_all(response.as_bytes()).await;
                    let _ = sock.shutdown().await;
                });
            }
        });
        ReadStub { endpoint, polls }
    }

    /// Read one request, body included, and return its head.
    async fn read_request(sock: &mut TcpStream) -> String {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 4096];
        loop {
            if let Some(end) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                let head = String::from_utf8_lossy(&buf[..end]).to_string();
                let body_len = head
                    .lines()
                    .filter_map(|l| l.split_once(':'))
                    .find(|(k, _)| k.trim().eq_ignore_ascii_case("content-length"))
                    .and_then(|(_, v)| v.trim().parse::<usize>().ok())
                    .unwrap_or(0);
                while buf.len() < end + 4 + body_len {
                    match sock.read(&mut chunk).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => buf.extend_from_slice(&chunk[..n]),
                    }
                }
                return head;
            }
            match sock.read(&mut chunk).await {
                Ok(0) | Err(_) => return String::from_utf8_lossy(&buf).to_string(),
                Ok(n) => buf.extend_from_slice(&chunk[..n]),
            }
        }
    }
}
