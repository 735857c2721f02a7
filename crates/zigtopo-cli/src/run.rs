//! Single analysis runs and the watch loop

use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{debug, info, warn};
use zigtopo_core::{find_latest_export, NetworkSummary, Snapshot, Topology};

use crate::config::Config;

/// Result of one analysis run
#[derive(Debug)]
pub struct RunOutcome {
    pub input: PathBuf,
    pub output: PathBuf,
    pub summary: NetworkSummary,
}

/// Pick the export to analyze: the explicit input, else the newest in the data dir
pub fn resolve_input(config: &Config, input: Option<&Path>) -> Result<PathBuf> {
    if let Some(path) = input {
        return Ok(path.to_path_buf());
    }
    match find_latest_export(&config.data.dir, &config.data.export_prefix)? {
        Some(path) => Ok(path),
        None => bail!(
            "No {}*.json export found in {}",
            config.data.export_prefix,
            config.data.dir.display()
        ),
    }
}

/// Load one export, infer its topology and write the JSON output
pub fn run_once(config: &Config, input: &Path) -> Result<RunOutcome> {
    let snapshot = Snapshot::from_file(input)
        .with_context(|| format!("Failed to load export {}", input.display()))?;

    if snapshot.network.channel.is_none() {
        debug!(path = %input.display(), "Export carries no network channel");
    }

    let topology = Topology::infer(&snapshot)?;

    let output = config.output_path();
    if let Some(parent) = output.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
    }
    let json = topology.to_json(config.output.pretty)?;
    std::fs::write(&output, json)
        .with_context(|| format!("Failed to write {}", output.display()))?;

    info!(
        input = %input.display(),
        output = %output.display(),
        devices = topology.nodes.len(),
        "Topology written"
    );
    if topology.diagnostics.total() > 0 {
        warn!(diagnostics = ?topology.diagnostics, "Snapshot contained inconsistent mesh data");
    }

    Ok(RunOutcome {
        input: input.to_path_buf(),
        output,
        summary: NetworkSummary::from_topology(&topology, config.analysis.weak_lqi_threshold),
    })
}

/// Identity of an export version: its path and modification time
fn fingerprint(path: &Path) -> Option<(PathBuf, SystemTime)> {
    let modified = std::fs::metadata(path).ok()?.modified().ok()?;
    Some((path.to_path_buf(), modified))
}

/// Re-run whenever a newer export appears, until Ctrl-C.
///
/// Failed runs are logged and retried on the next change.
pub async fn watch(config: Config, input: Option<PathBuf>, print_summary: bool) -> Result<()> {
    let mut ticker = interval(Duration::from_secs(config.watch.interval_secs.max(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut last: Option<(PathBuf, SystemTime)> = None;

    info!(
        interval_secs = config.watch.interval_secs,
        dir = %config.data.dir.display(),
        "Watching for exports"
    );

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = tokio::signal::ctrl_c() => {
                info!("Stopping watch");
                return Ok(());
            }
        }

        let path = match resolve_input(&config, input.as_deref()) {
            Ok(path) => path,
            Err(e) => {
                debug!("{:#}", e);
                continue;
            }
        };
        let current = fingerprint(&path);
        if current.is_some() && current == last {
            continue;
        }

        let run_config = config.clone();
        let run_path = path.clone();
        let result = tokio::task::spawn_blocking(move || run_once(&run_config, &run_path))
            .await
            .context("Analysis task panicked")?;

        // Remember the attempt either way so a broken export is not retried every tick
        last = current;
        match result {
            Ok(outcome) => {
                if print_summary {
                    println!("{}", outcome.summary);
                }
            }
            Err(e) => warn!(path = %path.display(), "Analysis failed: {:#}", e),
        }
    }
}
