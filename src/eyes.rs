use anyhow::{Context, Result};
use tracing::{debug, warn};

use crate::hands::BrowserDriver;
use crate::types::{ActionCall, ActionResult, Observation, Screenshot};

/// Current screenshot and URL of the page.
pub async fn capture(driver: &mut dyn BrowserDriver) -> Result<(Screenshot, String)> {
    let png = driver.screenshot().await.context("Failed to capture screenshot")?;
    let url = driver
        .current_url()
        .await
        .context("Failed to read current URL")?;
    debug!("[eyes] Captured {} bytes at {}", png.len(), url);
    Ok((Screenshot::from(png), url))
}

/// Pair every result of a batch with one shared post-batch capture.
/// A failed capture degrades to an empty image and an unknown URL so the
/// action results still reach the planner.
pub async fn observe(
    driver: &mut dyn BrowserDriver,
    calls: &[ActionCall],
    results: Vec<ActionResult>,
) -> Vec<Observation> {
    let screenshot = match driver.screenshot().await {
        Ok(png) => Screenshot::from(png),
        Err(e) => {
            warn!("[eyes] Screenshot failed: {:#}", e);
            Screenshot::from(Vec::new())
        }
    };
    let url = driver
        .current_url()
        .await
        .unwrap_or_else(|_| "unknown".into());

    calls
        .iter()
        .zip(results)
        .map(|(call, result)| Observation {
            action: call.name.clone(),
            result,
            url: url.clone(),
            screenshot: screenshot.clone(),
        })
        .collect()
}
