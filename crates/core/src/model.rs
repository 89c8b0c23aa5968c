use serde::{Deserialize, Serialize};

/// Coarse model family used to predict RAM footprint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Baseline {
    Sd1,
    Sd2_512,
    Sd2_768,
    SdXl,
}

impl Baseline {
    /// Expected resident-set size for a model of this baseline, per the fixed policy table.
    pub fn expected_ram_bytes(self) -> u64 {
        const GIB: u64 = 1024 * 1024 * 1024;
        match self {
            Baseline::Sd1 => 3 * GIB,
            Baseline::Sd2_512 => 4 * GIB,
            Baseline::Sd2_768 => 5 * GIB,
            Baseline::SdXl => (5.75 * GIB as f64) as u64,
        }
    }
}

/// Residency state of a model somewhere in the process fleet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadState {
    OnDisk,
    Loading,
    LoadedInRam,
    LoadedInVram,
}

impl LoadState {
    pub fn is_resident(self) -> bool {
        matches!(self, LoadState::LoadedInRam | LoadState::LoadedInVram)
    }
}

/// A single entry from the pre-downloaded model reference catalog (§4.10).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelReference {
    pub name: String,
    pub baseline: Baseline,
    /// Opaque raw record bytes as published by the catalog (thresholds, styles, etc).
    #[serde(default)]
    pub raw_record: serde_json::Value,
}
