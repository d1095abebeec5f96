//! Bounded readiness polling.
//!
//! Both probes retry at a fixed interval and treat transient failures as
//! "not ready yet". A permanent provider error ends the running wait at once;
//! otherwise only an exhausted budget is final, and what that means is up to
//! the caller.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use provision_core::{ComputeProvider, InstanceInfo, InstanceRef, ProviderError};
use tokio::net::TcpStream;
use tracing::{debug, warn};

/// Outcome of one bounded wait.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeResult {
    pub ready: bool,
    pub attempts: u32,
    /// Last error seen, for diagnostics when the budget runs out.
    pub last_error: Option<String>,
}

/// Result of waiting for an instance to reach `RUNNING`.
#[derive(Debug, Clone)]
pub struct RunningProbe {
    pub result: ProbeResult,
    /// Snapshot from the successful status check.
    pub instance: Option<InstanceInfo>,
    /// Non-transient provider error that stopped polling early.
    pub failure: Option<ProviderError>,
}

/// TCP reachability check.
#[async_trait]
pub trait TcpProbe: Send + Sync {
    async fn is_reachable(&self, host: &str, port: u16) -> Result<(), String>;
}

/// Connects and immediately closes.
#[derive(Debug, Clone)]
pub struct TcpConnectProbe {
    pub connect_timeout: Duration,
}

impl TcpConnectProbe {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

#[async_trait]
impl TcpProbe for TcpConnectProbe {
    async fn is_reachable(&self, host: &str, port: u16) -> Result<(), String> {
        match tokio::time::timeout(self.connect_timeout, TcpStream::connect((host, port))).await {
            Ok(Ok(_stream)) => Ok(()),
            Ok(Err(e)) => Err(e.to_string()),
            Err(_) => Err(format!(
                "connect timed out after {}ms",
                self.connect_timeout.as_millis()
            )),
        }
    }
}

#[derive(Clone)]
pub struct ReadinessProber {
    compute: Arc<dyn ComputeProvider>,
    tcp: Arc<dyn TcpProbe>,
}

impl ReadinessProber {
    pub fn new(compute: Arc<dyn ComputeProvider>, tcp: Arc<dyn TcpProbe>) -> Self {
        Self { compute, tcp }
    }

    /// Poll instance status until it reports running.
    pub async fn wait_for_running(
        &self,
        instance: &InstanceRef,
        max_attempts: u32,
        interval: Duration,
    ) -> RunningProbe {
        let mut last_error = None;
        for attempt in 1..=max_attempts {
            match self.compute.get_instance(instance).await {
                Ok(info) if info.is_running() => {
                    debug!(instance = %instance, attempt, "Instance running");
                    return RunningProbe {
                        result: ProbeResult {
                            ready: true,
                            attempts: attempt,
                            last_error: None,
                        },
                        instance: Some(info),
                        failure: None,
                    };
                }
                Ok(info) => {
                    debug!(instance = %instance, attempt, status = info.status.as_str(), "Instance not running yet");
                    last_error = None;
                }
                Err(e) if !e.is_transient() => {
                    warn!(instance = %instance, attempt, error = %e, "Instance status check failed permanently");
                    return RunningProbe {
                        result: ProbeResult {
                            ready: false,
                            attempts: attempt,
                            last_error: Some(e.to_string()),
                        },
                        instance: None,
                        failure: Some(e),
                    };
                }
                Err(e) => {
                    debug!(instance = %instance, attempt, error = %e, "Instance status check failed");
                    last_error = Some(e.to_string());
                }
            }
            if attempt < max_attempts {
                tokio::time::sleep(interval).await;
            }
        }

        warn!(instance = %instance, attempts = max_attempts, "Instance did not reach running state");
        RunningProbe {
            result: ProbeResult {
                ready: false,
                attempts: max_attempts,
                last_error,
            },
            instance: None,
            failure: None,
        }
    }

    /// Probe `host:port` until a TCP connection succeeds.
    pub async fn wait_for_ssh_reachable(
        &self,
        host: &str,
        port: u16,
        max_attempts: u32,
        interval: Duration,
    ) -> ProbeResult {
        let mut last_error = None;
        for attempt in 1..=max_attempts {
            match self.tcp.is_reachable(host, port).await {
                Ok(()) => {
                    debug!(host, port, attempt, "SSH port reachable");
                    return ProbeResult {
                        ready: true,
                        attempts: attempt,
                        last_error: None,
                    };
                }
                Err(e) => {
                    debug!(host, port, attempt, error = %e, "SSH port not reachable yet");
                    last_error = Some(e);
                }
            }
            if attempt < max_attempts {
                tokio::time::sleep(interval).await;
            }
        }

        warn!(host, port, attempts = max_attempts, "SSH port never became reachable");
        ProbeResult {
            ready: false,
            attempts: max_attempts,
            last_error,
        }
    }
}
