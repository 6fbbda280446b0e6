//! Health probe logic and consecutive-threshold tracking.

use tracing::{debug, warn};

use strata_core::HealthContract;

/// Result of a single health probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// The endpoint returned the expected status.
    Pass,
    /// The endpoint answered with an unexpected status.
    Fail,
    /// The probe could not be executed (connection error or timeout).
    /// Counts as a failure for thresholds.
    Error,
}

/// Aggregate health verdict for a traffic target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Neither threshold reached yet; keep probing.
    Pending,
    /// Healthy-threshold consecutive passes observed.
    Healthy,
    /// Unhealthy-threshold consecutive failures observed.
    Unhealthy,
}

/// Tracks consecutive probe results against a health contract.
#[derive(Debug)]
pub struct ProbeTracker {
    verdict: Verdict,
    consecutive_passes: u32,
    consecutive_failures: u32,
    healthy_threshold: u32,
    unhealthy_threshold: u32,
}

impl ProbeTracker {
    pub fn new(contract: &HealthContract) -> Self {
        Self::with_thresholds(contract.healthy_threshold, contract.unhealthy_threshold)
    }

    pub fn with_thresholds(healthy_threshold: u32, unhealthy_threshold: u32) -> Self {
        Self {
            verdict: Verdict::Pending,
            consecutive_passes: 0,
            consecutive_failures: 0,
            healthy_threshold: healthy_threshold.max(1),
            unhealthy_threshold: unhealthy_threshold.max(1),
        }
    }

    /// Record a probe result and return the updated verdict.
    ///
    /// An isolated failure resets the pass run (and vice versa) without
    /// settling the verdict — only a contiguous run reaches a threshold.
    pub fn record(&mut self, outcome: ProbeOutcome) -> Verdict {
        match outcome {
            ProbeOutcome::Pass => {
                self.consecutive_failures = 0;
                self.consecutive_passes += 1;
                if self.consecutive_passes >= self.healthy_threshold {
                    if self.verdict != Verdict::Healthy {
                        debug!(passes = self.consecutive_passes, "target is healthy");
                    }
                    self.verdict = Verdict::Healthy;
                }
            }
            ProbeOutcome::Fail | ProbeOutcome::Error => {
                self.consecutive_passes = 0;
                self.consecutive_failures += 1;
                if self.consecutive_failures >= self.unhealthy_threshold {
                    if self.verdict != Verdict::Unhealthy {
                        warn!(
                            failures = self.consecutive_failures,
                            threshold = self.unhealthy_threshold,
                            "target is unhealthy"
                        );
                    }
                    self.verdict = Verdict::Unhealthy;
                }
            }
        }
        self.verdict
    }

    pub fn verdict(&self) -> Verdict {
        self.verdict
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Reset to `Pending` with empty runs, e.g. when verification of a
    /// fresh target begins.
    pub fn reset(&mut self) {
        self.verdict = Verdict::Pending;
        self.consecutive_passes = 0;
        self.consecutive_failures = 0;
    }
}

/// Perform one HTTP health probe against `address` using the contract's
/// path, expected status, and timeout.
pub async fn http_probe(address: &str, contract: &HealthContract) -> ProbeOutcome {
    let uri = format!("http://{address}{}", contract.path);

    let result = tokio::time::timeout(contract.timeout(), async {
        let stream = match tokio::net::TcpStream::connect(address).await {
            Ok(s) => s,
            Err(e) => {
                debug!(error = %e, %uri, "health probe connection failed");
                return ProbeOutcome::Error;
            }
        };

        let io = hyper_util::rt::TokioIo::new(stream);
        let (mut sender, conn) = match hyper::client::conn::http1::handshake(io).await {
            Ok(pair) => pair,
            Err(e) => {
                debug!(error = %e, %uri, "health probe handshake failed");
                return ProbeOutcome::Error;
            }
        };

        // Drive the connection in the background.
        tokio::spawn(async move {
            let _ = conn.await;
        });

        let req = match http::Request::builder()
            .method("GET")
            .uri(&uri)
            .header("host", address)
            .header("user-agent", "strata-health/0.1")
            .body(http_body_util::Empty::<bytes::Bytes>::new())
        {
            Ok(req) => req,
            Err(e) => {
                debug!(error = %e, %uri, "health probe request build failed");
                return ProbeOutcome::Error;
            }
        };

        match sender.send_request(req).await {
            Ok(resp) => {
                if resp.status().as_u16() == contract.expected_status {
                    ProbeOutcome::Pass
                } else {
                    debug!(status = %resp.status(), %uri, "health probe unexpected status");
                    ProbeOutcome::Fail
                }
            }
            Err(e) => {
                debug!(error = %e, %uri, "health probe request failed");
                ProbeOutcome::Error
            }
        }
    })
    .await;

    match result {
        Ok(outcome) => outcome,
        Err(_) => {
            debug!(%uri, "health probe timed out");
            ProbeOutcome::Error
        }
    }
}
