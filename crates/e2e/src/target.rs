//! Reachability of the application under test

use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::{info, warn};

use crate::config::{join_url, TargetConfig};
use crate::error::{E2eError, E2eResult};

/// Poll the application until it answers, or give up after the configured
/// startup timeout
pub async fn wait_for_reachable(base_url: &str, config: &TargetConfig) -> E2eResult<()> {
    let url = join_url(base_url, &config.health_path);
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(2))
        .build()?;

    let deadline = Duration::from_secs(config.startup_timeout_secs);
    let start = Instant::now();
    let mut attempts = 0;

    while start.elapsed() < deadline {
        attempts += 1;

        match client.get(&url).send().await {
            // Any answer below 500 means something is serving the app,
            // including redirects to the login page.
            Ok(resp) if resp.status().as_u16() < 500 => {
                info!("Target reachable at {} ({})", url, resp.status());
                return Ok(());
            }
            Ok(resp) => {
                warn!("Reachability check returned {}", resp.status());
            }
            Err(e) => {
                if attempts == 1 {
                    info!("Waiting for {} to come up...", url);
                }
                if !e.is_connect() {
                    warn!("Reachability check error: {}", e);
                }
            }
        }

        sleep(Duration::from_millis(250)).await;
    }

    Err(E2eError::TargetUnreachable(attempts))
}
