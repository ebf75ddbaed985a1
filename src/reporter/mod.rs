//! Usage reporters
//!
//! A tunnel config may carry a `reporter` node next to its transport. The
//! compiled [`Reporter`] runs for as long as a client session and sends its
//! reports through the tunnel's own stream dialer:
//!
//! ```text
//! start_session ──▶ report ──sleep(interval)──▶ report ──▶ ... ──▶ cancel
//! ```
//!
//! A zero interval reports once per session.

mod http;

pub use http::{HttpReporter, HttpRequest};

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::common::Result;
use crate::transport::StreamDialer;

/// Sends one report per call over streams from the given dialer.
#[async_trait]
pub trait Reporter: Send + Sync {
    async fn report(&self, dialer: &dyn StreamDialer) -> Result<()>;

    /// Time between reports within a session.
    fn interval(&self) -> Duration;
}

pub type SharedReporter = Arc<dyn Reporter>;

/// Report now and then every interval until `cancel` fires. Failed reports
/// are logged and do not end the loop.
pub async fn run(reporter: SharedReporter, dialer: Arc<dyn StreamDialer>, cancel: CancellationToken) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            result = reporter.report(&*dialer) => {
                if let Err(e) = result {
                    warn!("Report failed: {}", e);
                }
            }
        }

        let interval = reporter.interval();
        if interval.is_zero() {
            break;
        }
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(interval) => {}
        }
    }
    debug!("Stopping reporting");
}
