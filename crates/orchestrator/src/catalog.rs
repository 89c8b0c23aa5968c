use std::collections::HashMap;
use std::path::Path;

use gridimg_core::ModelReference;

use crate::errors::OrchestratorError;

/// The immutable, pre-downloaded model reference catalog (§4.10, §9), loaded once
/// at startup from a JSON file: a map of model name to `{baseline, raw_record}`.
pub(crate) struct ModelCatalog {
    entries: HashMap<String, ModelReference>,
}

impl ModelCatalog {
    pub(crate) async fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = tokio::fs::read_to_string(path).await?;
        let list: Vec<ModelReference> = serde_json::from_str(&raw)?;
        let entries = list.into_iter().map(|m| (m.name.clone(), m)).collect();
        Ok(Self { entries })
    }

    pub(crate) fn get(&self, name: &str) -> Option<&ModelReference> {
        self.entries.get(name)
    }

    /// Expected RAM usage for `name`'s baseline, or a configuration fault if the
    /// model (or its baseline) is unknown to the catalog.
    pub(crate) fn expected_ram_bytes(&self, name: &str) -> Result<u64, OrchestratorError> {
        self.entries
            .get(name)
            .map(|m| m.baseline.expected_ram_bytes())
            .ok_or_else(|| {
                OrchestratorError::Configuration(format!(
                    "model '{name}' has no catalog entry / unknown baseline"
                ))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gridimg_core::Baseline;

    #[tokio::test]
    async fn loads_and_looks_up_entries() {
        let dir = tempdir();
        let path = dir.join("catalog.json");
        tokio::fs::write(
            &path,
            serde_json::to_vec(&vec![ModelReference {
                name: "stable_diffusion_1".to_string(),
                baseline: Baseline::Sd1,
                raw_record: serde_json::json!({}),
            }])
            .unwrap(),
        )
        .await
        .unwrap();

        let catalog = ModelCatalog::load(&path).await.unwrap();
        assert!(catalog.get("stable_diffusion_1").is_some());
        assert_eq!(
            catalog.expected_ram_bytes("stable_diffusion_1").unwrap(),
            Baseline::Sd1.expected_ram_bytes()
        );
        assert!(catalog.expected_ram_bytes("unknown_model").is_err());

        tokio::fs::remove_file(&path).await.ok();
    }

    fn tempdir() -> std::path::PathBuf {
        std::env::temp_dir()
    }
}
