//! HTTP load generator for a single endpoint.
//!
//! Two traffic shapes are supported:
//!
//! - [`burst_test`] — fire every request as fast as possible, with at most
//!   `concurrency` in flight.
//! - [`sustained_test`] — spread the requests evenly over a fixed duration.
//!
//! Both return the per-request [`RequestResult`]s and the wall-clock time
//! taken; [`Report`] turns them into throughput, latency percentiles and
//! status/error breakdowns.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::StreamExt;
use futures_util::stream;
use tokio::sync::Semaphore;

/// Per-request timeout.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Requests the sustained test keeps in flight at once; later ones queue.
pub const SUSTAINED_MAX_IN_FLIGHT: usize = 100;

/// Number of distinct error messages shown in a report.
const REPORTED_ERROR_KINDS: usize = 5;

/// Errors that abort a load test before any request is sent.
#[derive(Debug, thiserror::Error)]
pub enum LoadTestError {
    /// The HTTP client could not be constructed.
    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),
}

/// Outcome of one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestResult {
    /// 1-based sequence number.
    pub request_num: usize,
    /// Response status, if a response arrived.
    pub status: Option<u16>,
    /// Error message, if the request failed.
    pub error: Option<String>,
    /// Time from send to fully read body (or failure).
    pub duration: Duration,
}

impl RequestResult {
    /// A response arrived and its body was read.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.status.is_some() && self.error.is_none()
    }
}

fn build_client(pool_size: usize) -> Result<reqwest::Client, LoadTestError> {
    reqwest::Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .pool_max_idle_per_host(pool_size)
        .no_proxy()
        .build()
        .map_err(LoadTestError::Client)
}

/// Sends one GET and reads the full body.
pub async fn send_request(client: &reqwest::Client, url: &str, request_num: usize) -> RequestResult {
    let start = Instant::now();
    let outcome = async {
        let response = client.get(url).send().await?;
        let status = response.status().as_u16();
        response.bytes().await?;
        Ok::<_, reqwest::Error>(status)
    }
    .await;
    let duration = start.elapsed();

    match outcome {
        Ok(status) => RequestResult {
            request_num,
            status: Some(status),
            error: None,
            duration,
        },
        Err(err) => {
            tracing::debug!(request_num, error = %err, "request failed");
            RequestResult {
                request_num,
                status: None,
                error: Some(err.to_string()),
                duration,
            }
        }
    }
}

/// Sends `total_requests` requests with at most `concurrency` in flight.
///
/// # Errors
///
/// Returns [`LoadTestError::Client`] if the HTTP client cannot be built.
pub async fn burst_test(
    url: &str,
    total_requests: usize,
    concurrency: usize,
) -> Result<(Vec<RequestResult>, Duration), LoadTestError> {
    let concurrency = concurrency.max(1);
    let client = build_client(concurrency)?;

    let start = Instant::now();
    let results = stream::iter(1..=total_requests)
        .map(|n| send_request(&client, url, n))
        .buffer_unordered(concurrency)
        .collect::<Vec<_>>()
        .await;
    Ok((results, start.elapsed()))
}

/// Sends `total_requests` requests spread evenly over `duration`.
///
/// Each request runs as its own task, so a slow response does not delay the
/// schedule. At most [`SUSTAINED_MAX_IN_FLIGHT`] requests are on the wire at
/// once; a task that finds no free slot waits for one before its clock starts.
///
/// # Errors
///
/// Returns [`LoadTestError::Client`] if the HTTP client cannot be built.
pub async fn sustained_test(
    url: &str,
    total_requests: usize,
    duration: Duration,
) -> Result<(Vec<RequestResult>, Duration), LoadTestError> {
    let client = build_client(SUSTAINED_MAX_IN_FLIGHT)?;
    let in_flight = Arc::new(Semaphore::new(SUSTAINED_MAX_IN_FLIGHT));
    let delay = if total_requests == 0 {
        Duration::ZERO
    } else {
        duration.div_f64(total_requests as f64)
    };

    let start = Instant::now();
    let mut tasks = Vec::with_capacity(total_requests);
    for n in 1..=total_requests {
        if n > 1 {
            tokio::time::sleep(delay).await;
        }
        let client = client.clone();
        let url = url.to_owned();
        let in_flight = Arc::clone(&in_flight);
        tasks.push(tokio::spawn(async move {
            // The semaphore is never closed, so this only ever waits.
            let _slot = in_flight.acquire().await;
            send_request(&client, &url, n).await
        }));
    }

    let results = futures_util::future::join_all(tasks)
        .await
        .into_iter()
        .filter_map(|joined| match joined {
            Ok(result) => Some(result),
            Err(err) => {
                tracing::warn!(error = %err, "request task failed");
                None
            }
        })
        .collect();
    Ok((results, start.elapsed()))
}

/// Latency statistics over successful requests.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LatencyStats {
    /// Fastest request.
    pub min: Duration,
    /// Slowest request.
    pub max: Duration,
    /// Arithmetic mean.
    pub mean: Duration,
    /// Median; the average of the two middle values for even counts.
    pub median: Duration,
    /// Sample standard deviation; needs at least two samples.
    pub std_dev: Option<Duration>,
    /// 50th percentile.
    pub p50: Duration,
    /// 95th percentile.
    pub p95: Duration,
    /// 99th percentile.
    pub p99: Duration,
}

impl LatencyStats {
    /// Computes statistics, or `None` for an empty sample.
    #[must_use]
    pub fn from_durations(durations: &[Duration]) -> Option<Self> {
        let mut sorted = durations.to_vec();
        sorted.sort_unstable();
        let (&min, &max) = (sorted.first()?, sorted.last()?);

        let count = sorted.len() as f64;
        let secs: Vec<f64> = sorted.iter().map(Duration::as_secs_f64).collect();
        let mean = secs.iter().sum::<f64>() / count;

        let mid = sorted.len() / 2;
        let median = if sorted.len() % 2 == 0 {
            (sorted[mid - 1] + sorted[mid]) / 2
        } else {
            sorted[mid]
        };

        let std_dev = (sorted.len() > 1).then(|| {
            let variance =
                secs.iter().map(|s| (s - mean).powi(2)).sum::<f64>() / (count - 1.0);
            Duration::from_secs_f64(variance.sqrt())
        });

        Some(Self {
            min,
            max,
            mean: Duration::from_secs_f64(mean),
            median,
            std_dev,
            p50: percentile(&sorted, 0.50),
            p95: percentile(&sorted, 0.95),
            p99: percentile(&sorted, 0.99),
        })
    }
}

/// Nearest-rank-below percentile of a non-empty sorted slice.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn percentile(sorted: &[Duration], q: f64) -> Duration {
    let index = ((sorted.len() as f64) * q) as usize;
    sorted[index.min(sorted.len() - 1)]
}

/// Summary of one test run.
#[derive(Debug, Clone, PartialEq)]
pub struct Report {
    /// Heading printed above the results.
    pub name: String,
    /// Wall-clock time of the whole run.
    pub elapsed: Duration,
    /// Requests sent.
    pub total: usize,
    /// Requests that got a response.
    pub successful: usize,
    /// Latency over successful requests.
    pub latency: Option<LatencyStats>,
    /// Count per response status.
    pub status_codes: BTreeMap<u16, usize>,
    /// Count per error message, in first-seen order.
    pub errors: Vec<(String, usize)>,
}

impl Report {
    /// Aggregates `results`.
    #[must_use]
    pub fn new(name: impl Into<String>, results: &[RequestResult], elapsed: Duration) -> Self {
        let successful: Vec<Duration> = results
            .iter()
            .filter(|r| r.is_success())
            .map(|r| r.duration)
            .collect();

        let mut status_codes = BTreeMap::new();
        for status in results.iter().filter_map(|r| r.status) {
            *status_codes.entry(status).or_insert(0) += 1;
        }

        let mut errors: Vec<(String, usize)> = Vec::new();
        for error in results.iter().filter_map(|r| r.error.as_deref()) {
            match errors.iter_mut().find(|(seen, _)| seen == error) {
                Some((_, count)) => *count += 1,
                None => errors.push((error.to_owned(), 1)),
            }
        }

        Self {
            name: name.into(),
            elapsed,
            total: results.len(),
            successful: successful.len(),
            latency: LatencyStats::from_durations(&successful),
            status_codes,
            errors,
        }
    }

    /// Requests that did not get a response.
    #[must_use]
    pub const fn failed(&self) -> usize {
        self.total - self.successful
    }

    /// Throughput over the whole run.
    #[must_use]
    pub fn requests_per_second(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 { self.total as f64 / secs } else { 0.0 }
    }

    fn percent(&self, part: usize) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            part as f64 / self.total as f64 * 100.0
        }
    }
}

fn ms(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} Results:", self.name)?;
        writeln!(f, "{}", "-".repeat(70))?;
        writeln!(f, "Total time: {:.2} seconds", self.elapsed.as_secs_f64())?;
        writeln!(f, "Total requests: {}", self.total)?;
        writeln!(
            f,
            "Successful: {} ({:.1}%)",
            self.successful,
            self.percent(self.successful)
        )?;
        writeln!(f, "Failed: {} ({:.1}%)", self.failed(), self.percent(self.failed()))?;
        writeln!(f, "Requests per second: {:.2}", self.requests_per_second())?;

        if let Some(latency) = &self.latency {
            writeln!(f)?;
            writeln!(f, "Response Time Statistics:")?;
            writeln!(f, "  Min: {:.2}ms", ms(latency.min))?;
            writeln!(f, "  Max: {:.2}ms", ms(latency.max))?;
            writeln!(f, "  Mean: {:.2}ms", ms(latency.mean))?;
            writeln!(f, "  Median: {:.2}ms", ms(latency.median))?;
            if let Some(std_dev) = latency.std_dev {
                writeln!(f, "  Std Dev: {:.2}ms", ms(std_dev))?;
            }
            writeln!(f, "  P50: {:.2}ms", ms(latency.p50))?;
            writeln!(f, "  P95: {:.2}ms", ms(latency.p95))?;
            writeln!(f, "  P99: {:.2}ms", ms(latency.p99))?;
        }

        writeln!(f)?;
        writeln!(f, "Status code distribution:")?;
        for (status, count) in &self.status_codes {
            writeln!(f, "  {status}: {count}")?;
        }

        if !self.errors.is_empty() {
            let total_errors: usize = self.errors.iter().map(|(_, count)| count).sum();
            writeln!(f)?;
            writeln!(f, "Errors ({total_errors}):")?;
            for (error, count) in self.errors.iter().take(REPORTED_ERROR_KINDS) {
                writeln!(f, "  {error}: {count} occurrences")?;
            }
        }
        Ok(())
    }
}
