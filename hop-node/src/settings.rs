//! Application settings

use std::path::{Path, PathBuf};

use anyhow::Context;
use hop_link::{AntiJamConfig, HeartbeatConfig, LinkConfig, MacConfig};
use hop_plan::{FrequencyPlan, HopPolicy, NetConfig, TimingConfig};
use hop_sim::{JammerConfig, DEFAULT_NOISE_FLOOR};
use serde::{Deserialize, Serialize};

/// Simulated air settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SimSettings {
    /// Jammer on the shared air, if any
    pub jammer: Option<JammerConfig>,
    /// Hold each burst until its scheduled start time
    pub paced: bool,
    /// Noise magnitude with no jammer present
    pub noise_floor: f32,
}

impl Default for SimSettings {
    fn default() -> Self {
        Self {
            jammer: None,
            paced: true,
            noise_floor: DEFAULT_NOISE_FLOOR,
        }
    }
}

/// Application settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Settings {
    /// Run time in seconds
    #[serde(default = "default_run_time")]
    pub run_time: u64,
    /// File that link events are appended to
    #[serde(default)]
    pub event_log: Option<PathBuf>,
    /// Net membership; `node_id` is ignored, every member is simulated
    #[serde(default)]
    pub net: NetConfig,
    #[serde(default)]
    pub frequency_plan: FrequencyPlan,
    #[serde(default)]
    pub timing: TimingConfig,
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,
    #[serde(default)]
    pub anti_jam: AntiJamConfig,
    #[serde(default)]
    pub mac: MacConfig,
    #[serde(default)]
    pub hop_policy: HopPolicy,
    /// Run the continuous multi-access schedule instead of FDD/FH
    #[serde(default)]
    pub continuous: bool,
    /// Node that announces allocations; when unset every node follows
    /// `anti_jam.broadcast_allocations`
    #[serde(default)]
    pub coordinator: Option<u8>,
    #[serde(default)]
    pub sim: SimSettings,
}

fn default_run_time() -> u64 {
    180
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            run_time: default_run_time(),
            event_log: None,
            net: NetConfig::default(),
            frequency_plan: FrequencyPlan::default(),
            timing: TimingConfig::default(),
            heartbeat: HeartbeatConfig::default(),
            anti_jam: AntiJamConfig::default(),
            mac: MacConfig::default(),
            hop_policy: HopPolicy::default(),
            continuous: false,
            coordinator: None,
            sim: SimSettings::default(),
        }
    }
}

impl Settings {
    /// Load settings from a JSON file
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings from {}", path.display()))?;
        serde_json::from_str(&json)
            .with_context(|| format!("Failed to parse settings in {}", path.display()))
    }

    /// Save settings as pretty JSON
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let json = serde_json::to_string_pretty(self).context("Failed to serialize settings")?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write settings to {}", path.display()))
    }

    /// Link configuration for one member of the net
    pub fn link_config(&self, node_id: u8) -> LinkConfig {
        let mut anti_jam = self.anti_jam.clone();
        if let Some(coordinator) = self.coordinator {
            anti_jam.broadcast_allocations = coordinator == node_id;
        }
        LinkConfig {
            net: NetConfig::new(node_id, self.net.basestation_id, self.net.node_ids.clone()),
            frequency_plan: self.frequency_plan.clone(),
            timing: self.timing.clone(),
            heartbeat: self.heartbeat,
            anti_jam,
            mac: self.mac,
            hop_policy: self.hop_policy,
            continuous: self.continuous,
            ..Default::default()
        }
    }
}
