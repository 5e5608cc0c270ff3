//! Configuration file watcher for hot reload.
//!
//! Editors often emit several events per save, so reloads wait for the
//! file to settle before parsing. A file that fails to load or validate is
//! logged and ignored; the running configuration stays in place.

use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use crate::config::loader::load_config;
use crate::config::schema::{GuardConfig, TargetConfig};

/// Quiet period after the last file event before reloading.
const SETTLE: Duration = Duration::from_millis(250);

/// Watches the configuration file and emits validated reloads.
pub struct ConfigWatcher {
    path: PathBuf,
    settle: Duration,
}

impl ConfigWatcher {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            settle: SETTLE,
        }
    }

    /// Start watching. Keep the returned watcher alive for as long as
    /// reloads are wanted. Must be called from within a tokio runtime.
    pub fn run(self) -> Result<(RecommendedWatcher, mpsc::UnboundedReceiver<GuardConfig>), notify::Error> {
        let (event_tx, mut event_rx) = mpsc::unbounded_channel::<()>();
        let (update_tx, update_rx) = mpsc::unbounded_channel();

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) if event.kind.is_modify() || event.kind.is_create() => {
                    let _ = event_tx.send(());
                }
                Ok(_) => {}
                Err(e) => tracing::error!(error = %e, "Config watch error"),
            },
            Config::default().with_poll_interval(Duration::from_secs(2)),
        )?;
        watcher.watch(&self.path, RecursiveMode::NonRecursive)?;

        let path = self.path.clone();
        let settle = self.settle;
        tokio::spawn(async move {
            while event_rx.recv().await.is_some() {
                // Swallow the burst that belongs to the same save.
                loop {
                    tokio::time::sleep(settle).await;
                    let mut more = false;
                    while event_rx.try_recv().is_ok() {
                        more = true;
                    }
                    if !more {
                        break;
                    }
                }

                tracing::info!(path = %path.display(), "Config file change detected, reloading");
                match load_config(&path) {
                    Ok(config) => {
                        if update_tx.send(config).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "Failed to reload config, keeping current configuration");
                    }
                }
            }
        });

        tracing::info!(path = %self.path.display(), "Config watcher started");
        Ok((watcher, update_rx))
    }
}

/// How the target list changed between two configurations.
#[derive(Debug, Default, PartialEq)]
pub struct TargetDiff {
    pub added: Vec<TargetConfig>,
    /// Same name, different settings.
    pub changed: Vec<TargetConfig>,
    pub removed: Vec<String>,
}

impl TargetDiff {
    pub fn between(old: &[TargetConfig], new: &[TargetConfig]) -> Self {
        let mut diff = TargetDiff::default();
        for target in new {
            match old.iter().find(|o| o.name == target.name) {
                None => diff.added.push(target.clone()),
                Some(previous) if previous != target => diff.changed.push(target.clone()),
                Some(_) => {}
            }
        }
        diff.removed = old
            .iter()
            .filter(|o| !new.iter().any(|n| n.name == o.name))
            .map(|o| o.name.clone())
            .collect();
        diff
    }

    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.changed.is_empty() && self.removed.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target(name: &str, interval: u64) -> TargetConfig {
        TargetConfig {
            name: name.to_string(),
            url: format!("https://ci.example.com/{name}"),
            interval_secs: Some(interval),
            ttl_ms: None,
            rotate: false,
        }
    }

    #[test]
    fn test_target_diff() {
        let old = vec![target("builds", 30), target("prs", 60), target("wi", 60)];
        let new = vec![target("builds", 30), target("prs", 15), target("releases", 60)];

        let diff = TargetDiff::between(&old, &new);
        assert_eq!(diff.added, vec![target("releases", 60)]);
        assert_eq!(diff.changed, vec![target("prs", 15)]);
        assert_eq!(diff.removed, vec!["wi".to_string()]);
        assert!(TargetDiff::between(&new, &new).is_empty());
    }

    #[tokio::test]
    async fn test_reload_on_change() {
        let dir = std::env::temp_dir().join(format!("pollguard-watch-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("pollguard.toml");
        std::fs::write(&path, "[polling]\ndefault_interval_secs = 60\n").unwrap();

        let (_watcher, mut updates) = ConfigWatcher::new(&path).run().unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        std::fs::write(&path, "[polling]\ndefault_interval_secs = 15\n").unwrap();

        let config = tokio::time::timeout(Duration::from_secs(10), updates.recv())
            .await
            .expect("reload within timeout")
            .unwrap();
        assert_eq!(config.polling.default_interval_secs, 15);

        let _ = std::fs::remove_dir_all(&dir);
    }
}
