//! Simulated net runner

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use hop_link::{
    FrameStats, LinkCounters, LinkError, LinkEvent, LinkNode, SessionHeartbeatStats,
};
use hop_plan::ScheduleMode;
use hop_sim::{SimAir, SimFrontEnd, SimModemFactory};
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::app::{AppManager, AppReport};
use crate::settings::Settings;

const EVENT_CHANNEL_SIZE: usize = 1024;

/// End-of-run state of one node
#[derive(Debug, Clone)]
pub struct NodeSummary {
    pub node_id: u8,
    pub epochs: u64,
    pub mode: ScheduleMode,
    pub allocation_version: u64,
    pub counters: LinkCounters,
    pub frames: FrameStats,
    pub heartbeat: SessionHeartbeatStats,
    pub hardware: String,
}

impl NodeSummary {
    fn new(node: &LinkNode) -> Self {
        Self {
            node_id: node.node_id(),
            epochs: node.epoch(),
            mode: node.mode(),
            allocation_version: node.modem().version(),
            counters: *node.mac().counters(),
            frames: *node.mac().frame_stats(),
            heartbeat: *node.mac().heartbeat().session(),
            hardware: node.hardware_stats().to_string(),
        }
    }
}

impl fmt::Display for NodeSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Node {}: {} epochs, ending in {} mode, allocation v{}",
            self.node_id, self.epochs, self.mode, self.allocation_version
        )?;
        writeln!(
            f,
            "  link: {} valid bytes, {}/{} bad headers/payloads, {} sent",
            self.counters.valid_bytes,
            self.counters.invalid_headers,
            self.counters.invalid_payloads,
            self.counters.packets_transmitted
        )?;
        writeln!(f, "  frames: {}", self.frames)?;
        writeln!(f, "  heartbeat: {}", self.heartbeat)?;
        write!(f, "  hardware: {}", self.hardware)
    }
}

/// Run every member of the net over one simulated air until the run time
/// expires or the run is terminated
pub async fn run_net(settings: &Settings, app: &AppManager) -> anyhow::Result<Vec<NodeSummary>> {
    let air = Arc::new(SimAir::new(settings.sim.noise_floor));
    air.set_jammer(settings.sim.jammer);
    if let Some(jammer) = settings.sim.jammer {
        info!(
            "Jammer on subcarriers {}..={} at power {}{}",
            jammer.first_subcarrier,
            jammer.last_subcarrier,
            jammer.power,
            jammer
                .victim
                .map_or(String::new(), |node| format!(" near node {}", node))
        );
    }

    let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_SIZE);
    let writer = tokio::spawn(write_events(
        events_rx,
        settings.event_log.clone(),
        app.clone(),
    ));

    let mut nodes = Vec::with_capacity(settings.net.node_ids.len());
    for &node_id in &settings.net.node_ids {
        let front_end =
            Arc::new(SimFrontEnd::new(node_id, air.clone()).paced(settings.sim.paced));
        let node = LinkNode::new(
            settings.link_config(node_id),
            front_end,
            Arc::new(SimModemFactory::new(air.clone()).for_node(node_id)),
        )
        .with_context(|| format!("Failed to start node {}", node_id))?
        .with_events(events_tx.clone())
        .with_drain_flag(app.termination_flag());
        nodes.push(node);
    }
    drop(events_tx);
    app.report(AppReport::InitDone);

    let handles: Vec<_> = nodes
        .into_iter()
        .map(|mut node| {
            let app = app.clone();
            tokio::spawn(async move {
                node.calibrate_noise().await?;
                node.run_until(|| app.is_continuing()).await?;
                Ok::<_, LinkError>(NodeSummary::new(&node))
            })
        })
        .collect();

    let mut summaries = Vec::with_capacity(handles.len());
    for handle in handles {
        let summary = handle.await.context("Node task failed")??;
        summaries.push(summary);
    }
    app.report(AppReport::RunComplete);

    writer.await.context("Event writer failed")??;
    Ok(summaries)
}

/// Append link events to the event log and turn mode switches into reports
async fn write_events(
    mut events: mpsc::Receiver<LinkEvent>,
    path: Option<PathBuf>,
    app: AppManager,
) -> anyhow::Result<()> {
    let mut file = match &path {
        Some(path) => Some(
            OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .await
                .with_context(|| format!("Failed to open event log {}", path.display()))?,
        ),
        None => None,
    };

    while let Some(event) = events.recv().await {
        debug!("{}", event);
        if let LinkEvent::ModeSwitched { node, to, .. } = &event {
            let report = match to {
                ScheduleMode::Fh => AppReport::SwitchedToAntiJam { node: *node },
                _ => AppReport::SwitchedToNormal { node: *node },
            };
            app.report(report);
        }
        if let Some(file) = file.as_mut() {
            file.write_all(format!("{}\n", event).as_bytes())
                .await
                .context("Failed to write event log")?;
        }
    }

    if let Some(mut file) = file {
        file.flush().await.context("Failed to flush event log")?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn quick_settings() -> Settings {
        let mut settings = Settings::default();
        settings.sim.paced = false;
        settings
    }

    #[tokio::test]
    async fn test_terminated_run_still_summarizes_every_node() {
        let app = AppManager::new(Duration::from_secs(60));
        app.terminate();
        let summaries = run_net(&quick_settings(), &app).await.unwrap();

        let ids: Vec<u8> = summaries.iter().map(|s| s.node_id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
        assert!(summaries.iter().all(|s| s.epochs == 0));
    }

    #[tokio::test]
    async fn test_events_are_logged_one_per_line() {
        let path = std::env::temp_dir().join(format!("hopnode-events-{}.log", std::process::id()));
        let _ = std::fs::remove_file(&path);
        let mut settings = quick_settings();
        settings.event_log = Some(path.clone());

        let app = AppManager::new(Duration::from_secs(1));
        let summaries = run_net(&settings, &app).await.unwrap();
        assert!(summaries.iter().all(|s| s.epochs > 0));

        let log = std::fs::read_to_string(&path).unwrap();
        assert!(log.lines().count() > 0);
        assert!(log.lines().any(|line| line.contains("SCHED")));
        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn test_bad_net_fails_with_context() {
        let mut settings = quick_settings();
        settings.net.node_ids = vec![1, 2];
        let app = AppManager::new(Duration::from_secs(1));
        let err = run_net(&settings, &app).await.unwrap_err();
        assert!(err.to_string().contains("Failed to start node 1"));
    }
}
