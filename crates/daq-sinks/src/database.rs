//! Time-series database sink: bounded queue, background batching worker,
//! HTTP POST with retry/backoff, drop-oldest overflow.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use daq_types::{DaqError, DaqResult, RetrySettings, Sample, StorageSettings};
use rand::Rng;
use reqwest::blocking::Client;
use tracing::{error, info, warn};

use crate::queue::{BoundedDropOldest, PushOutcome};
use crate::SampleSink;

const WORKER_POLL: Duration = Duration::from_secs(1);

struct WorkerParams {
    url: String,
    org: String,
    bucket: String,
    token: String,
    batch_size: usize,
    timeout: Duration,
    retry: RetrySettings,
    client: Client,
}

/// Sink that batches samples into InfluxDB line protocol and POSTs them to a
/// `/api/v2/write` endpoint. Delivery is at-most-once per attempt; under
/// sustained overload the bounded queue drops the oldest line and counts it.
pub struct DatabaseSink {
    url: String,
    org: String,
    bucket: String,
    token: String,
    batch_size: usize,
    timeout: Duration,
    queue_max_size: usize,
    verify_ssl: bool,
    retry: RetrySettings,
    queue: Option<Arc<BoundedDropOldest<String>>>,
    stop: Option<Arc<AtomicBool>>,
    worker: Option<JoinHandle<()>>,
    dropped_samples: Arc<AtomicU64>,
}

impl DatabaseSink {
    pub fn new(settings: &StorageSettings) -> Self {
        Self {
            url: settings.url.clone(),
            org: settings.org.clone(),
            bucket: settings.bucket.clone(),
            token: settings.token.clone(),
            batch_size: settings.batch_size,
            timeout: Duration::from_secs_f64(settings.timeout_s),
            queue_max_size: settings.queue_max_size,
            verify_ssl: settings.verify_ssl,
            retry: settings.retry.clone(),
            queue: None,
            stop: None,
            worker: None,
            dropped_samples: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Count of samples dropped so far due to queue overflow, exposed for
    /// status reporting and tests.
    pub fn dropped_samples(&self) -> u64 {
        self.dropped_samples.load(Ordering::Relaxed)
    }
}

impl SampleSink for DatabaseSink {
    fn open(&mut self) -> DaqResult<()> {
        if self.worker.is_some() {
            return Ok(());
        }
        let client = Client::builder()
            .danger_accept_invalid_certs(!self.verify_ssl)
            .build()
            .map_err(|e| DaqError::Other(anyhow::anyhow!(e)))?;

        let queue = Arc::new(BoundedDropOldest::new(self.queue_max_size));
        let stop = Arc::new(AtomicBool::new(false));
        let params = WorkerParams {
            url: self.url.clone(),
            org: self.org.clone(),
            bucket: self.bucket.clone(),
            token: self.token.clone(),
            batch_size: self.batch_size,
            timeout: self.timeout,
            retry: self.retry.clone(),
            client,
        };

        let worker_queue = queue.clone();
        let worker_stop = stop.clone();
        let handle = thread::Builder::new()
            .name("daq-database-sink".into())
            .spawn(move || worker_loop(worker_queue, worker_stop, params))
            .map_err(|e| DaqError::Other(anyhow::anyhow!(e)))?;

        self.queue = Some(queue);
        self.stop = Some(stop);
        self.worker = Some(handle);
        info!(url = %self.url, bucket = %self.bucket, "database sink worker started");
        Ok(())
    }

    fn handle_sample(&mut self, sample: &Sample) -> DaqResult<()> {
        let Some(queue) = &self.queue else {
            return Err(DaqError::SinkWriteFailed {
                sink: "database".into(),
                message: "sink not open".into(),
            });
        };
        let line = daq_types::sample_to_line(sample);
        match queue.push(line) {
            PushOutcome::Enqueued => {}
            PushOutcome::DroppedOldest => {
                warn!("database sink queue full, dropped oldest sample");
                self.dropped_samples.fetch_add(1, Ordering::Relaxed);
            }
            PushOutcome::DroppedNewest => {
                warn!("database sink queue overflow race, dropped newest sample");
                self.dropped_samples.fetch_add(1, Ordering::Relaxed);
            }
        }
        Ok(())
    }

    fn close(&mut self) {
        if let Some(stop) = &self.stop {
            stop.store(true, Ordering::SeqCst);
        }
        if let Some(queue) = &self.queue {
            queue.wake_all();
        }
        if let Some(handle) = self.worker.take() {
            if handle.join().is_err() {
                warn!("database sink worker panicked");
            }
        }
        self.queue = None;
        self.stop = None;
    }
}

fn worker_loop(queue: Arc<BoundedDropOldest<String>>, stop: Arc<AtomicBool>, params: WorkerParams) {
    loop {
        let first = match queue.pop_blocking(WORKER_POLL) {
            Some(line) => line,
            None => {
                if stop.load(Ordering::SeqCst) {
                    break;
                }
                continue;
            }
        };

        let mut lines = vec![first];
        lines.extend(queue.drain_up_to(params.batch_size.saturating_sub(1)));
        send_batch(&params, &lines);

        if stop.load(Ordering::SeqCst) && queue.is_empty() {
            break;
        }
    }
    info!("database sink worker stopped");
}

fn send_batch(params: &WorkerParams, lines: &[String]) {
    let body = lines.join("\n");
    let url = format!(
        "{}/api/v2/write?org={}&bucket={}&precision=ns",
        params.url, params.org, params.bucket
    );

    for attempt in 1..=params.retry.max_attempts {
        let result = params
            .client
            .post(&url)
            .header("Authorization", format!("Token {}", params.token))
            .timeout(params.timeout)
            .body(body.clone())
            .send();

        match result {
            Ok(response) => {
                let status = response.status();
                if status.as_u16() < 300 {
                    if attempt > 1 {
                        info!(attempt, "database sink batch delivered after retry");
                    }
                    return;
                }
                let retriable =
                    status.is_server_error() || matches!(status.as_u16(), 408 | 409 | 425 | 429);
                if !retriable || attempt == params.retry.max_attempts {
                    let headers = format!("{:?}", response.headers());
                    let body_text = response.text().unwrap_or_default();
                    let truncated: String = body_text.chars().take(512).collect();
                    error!(
                        status = %status,
                        headers = %headers,
                        body = %truncated,
                        lines = lines.len(),
                        "database sink dropping batch"
                    );
                    return;
                }
            }
            Err(err) => {
                if attempt == params.retry.max_attempts {
                    error!(error = %err, lines = lines.len(), "database sink dropping batch after transport failure");
                    return;
                }
            }
        }

        let delay = backoff_delay(&params.retry, attempt);
        if !delay.is_zero() {
            thread::sleep(delay);
        }
    }
}

fn backoff_delay(retry: &RetrySettings, attempt: u32) -> Duration {
    if retry.base_delay_s <= 0.0 {
        return Duration::ZERO;
    }
    let exponential = retry.base_delay_s * 2f64.powi(attempt as i32 - 1);
    let capped = match retry.max_backoff_s {
        Some(max) => exponential.min(max),
        None => exponential,
    };
    let jitter = rand::thread_rng().gen_range(0.0..=retry.base_delay_s);
    let mut delay = capped + jitter;
    if let Some(max) = retry.max_backoff_s {
        delay = delay.min(max);
    }
    Duration::from_secs_f64(delay.max(0.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_base_delay_yields_zero_backoff() {
        let retry = RetrySettings {
            max_attempts: 3,
            base_delay_s: 0.0,
            max_backoff_s: None,
        };
        assert_eq!(backoff_delay(&retry, 1), Duration::ZERO);
    }

    #[test]
    fn backoff_grows_and_respects_cap() {
        let retry = RetrySettings {
            max_attempts: 5,
            base_delay_s: 1.0,
            max_backoff_s: Some(2.0),
        };
        for attempt in 1..=5 {
            let delay = backoff_delay(&retry, attempt);
            assert!(delay.as_secs_f64() <= 2.0 + 1e-9);
        }
    }
}
