// Adapted from the host project's FD-exhaustion regression test: lowers the
// file-descriptor soft limit, then drives many more DirectoryWatcher
// create/close cycles than the limit allows. Each watcher owns exactly one
// OS observation handle exclusively (no sharing, per the resource policy);
// if close() ever failed to release it, this would eventually fail to open
// a new watch.

use std::time::Duration;

use anyhow::Result;
use fswatch_core::{DirectoryWatcher, DirectoryWatcherOptions};
use serial_test::serial;
use tempfile::TempDir;

struct RestoreRlimit {
    soft: u64,
    hard: u64,
}

impl Drop for RestoreRlimit {
    fn drop(&mut self) {
        if let Err(e) = rlimit::setrlimit(rlimit::Resource::NOFILE, self.soft, self.hard) {
            log::error!("failed to restore rlimit: {}", e);
        }
    }
}

#[tokio::test(flavor = "multi_thread")]
#[cfg(unix)]
#[serial]
async fn closing_watchers_releases_file_descriptors() -> Result<()> {
    let _ = env_logger::builder()
        .filter_level(log::LevelFilter::Debug)
        .is_test(true)
        .try_init();
    let (original_soft, original_hard) = rlimit::getrlimit(rlimit::Resource::NOFILE)?;
    let new_soft_limit = 64;

    if new_soft_limit > original_hard {
        return Ok(());
    }

    let _restorer = RestoreRlimit {
        soft: original_soft,
        hard: original_hard,
    };

    rlimit::setrlimit(rlimit::Resource::NOFILE, new_soft_limit, original_hard)?;

    let cycles = new_soft_limit + 20;

    for i in 0..cycles {
        let dir = TempDir::new()?;
        let mut watcher =
            DirectoryWatcher::new(dir.path().to_path_buf(), DirectoryWatcherOptions::default())
                .await
                .map_err(|e| anyhow::anyhow!("cycle {}: failed to construct watcher: {}", i, e))?;

        // Touch the watch so the underlying engine actually does work
        // before we tear it down.
        std::fs::write(dir.path().join("probe.txt"), "x")?;
        tokio::time::sleep(Duration::from_millis(10)).await;

        watcher.close().await;
    }
    Ok(())
}
