//! Result file downloads

use crate::backends::TaskBackend;
use crate::settings::RunConfig;
use rand::Rng;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Local name for a result URL: task number, then the last path segment
pub fn result_file_name(index: usize, position: usize, url: &str) -> String {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let last = path
        .rsplit('/')
        .find(|s| !s.is_empty())
        .filter(|s| !s.contains(':'))
        .unwrap_or("output");
    format!("{:03}_{}_{}", index + 1, position + 1, last)
}

/// Download every URL of a finished task into `dir`
///
/// Returns the written paths and the number of failed downloads.
pub async fn download_results(
    backend: &dyn TaskBackend,
    index: usize,
    urls: &[String],
    dir: &Path,
    config: &RunConfig,
) -> (Vec<PathBuf>, usize) {
    if let Err(e) = tokio::fs::create_dir_all(dir).await {
        warn!("Cannot create download directory {}: {}", dir.display(), e);
        return (Vec::new(), urls.len());
    }

    let mut written = Vec::new();
    let mut failed = 0;

    for (position, url) in urls.iter().enumerate() {
        if position > 0 {
            tokio::time::sleep(download_delay(config.download_delay_ms)).await;
        }
        let dest = dir.join(result_file_name(index, position, url));
        match backend.download(url, &dest).await {
            Ok(()) => {
                info!("Downloaded {}", dest.display());
                written.push(dest);
            }
            Err(e) => {
                warn!("Failed to download {}: {}", url, e);
                failed += 1;
            }
        }
    }

    (written, failed)
}

fn download_delay((min, max): (u64, u64)) -> Duration {
    if max <= min {
        return Duration::from_millis(min);
    }
    Duration::from_millis(rand::thread_rng().gen_range(min..=max))
}
