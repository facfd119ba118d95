use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const ENV_PROJECT_ROOT: &str = "MLG_PROJECT_ROOT";
pub const ENV_DEPOT_ROOT: &str = "MLG_DEPOT_ROOT";
pub const ENV_IMAGE_FORMAT: &str = "MLG_IMAGE_FORMAT";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SynthesisConfig {
    pub version: u32,
    /// Unpacked mod project; searched before the depot.
    #[serde(default)]
    pub project_root: Option<PathBuf>,
    /// Uncooked game depot.
    #[serde(default)]
    pub depot_root: Option<PathBuf>,
    /// Extension textures were exported with (`png`, `tga`, ...).
    #[serde(default = "default_image_format")]
    pub image_format: String,
}

fn default_image_format() -> String {
    "png".to_string()
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            version: 1,
            project_root: None,
            depot_root: None,
            image_format: default_image_format(),
        }
    }
}

impl SynthesisConfig {
    /// Environment variables override the file.
    pub fn apply_env(&mut self) {
        self.merge(
            std::env::var_os(ENV_PROJECT_ROOT).map(PathBuf::from),
            std::env::var_os(ENV_DEPOT_ROOT).map(PathBuf::from),
            std::env::var(ENV_IMAGE_FORMAT).ok(),
        );
    }

    pub fn merge(
        &mut self,
        project_root: Option<PathBuf>,
        depot_root: Option<PathBuf>,
        image_format: Option<String>,
    ) {
        if let Some(p) = project_root {
            self.project_root = Some(p);
        }
        if let Some(p) = depot_root {
            self.depot_root = Some(p);
        }
        if let Some(fmt) = image_format {
            let fmt = fmt.trim().trim_start_matches('.').to_ascii_lowercase();
            if !fmt.is_empty() {
                self.image_format = fmt;
            }
        }
    }
}

pub fn load_config(path: &Path) -> Result<SynthesisConfig> {
    if !path.is_file() {
        return Ok(SynthesisConfig::default());
    }
    let raw = fs::read(path).with_context(|| format!("Failed reading {}", path.display()))?;
    let cfg: SynthesisConfig = serde_json::from_slice(&raw)
        .with_context(|| format!("Invalid JSON in {}", path.display()))?;
    Ok(cfg)
}

pub fn save_config(path: &Path, cfg: &SynthesisConfig) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed creating {}", parent.display()))?;
    }
    fs::write(path, serde_json::to_vec_pretty(cfg)?)
        .with_context(|| format!("Failed writing {}", path.display()))?;
    Ok(())
}

pub fn default_config_path() -> PathBuf {
    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home).join(".config/mlsetup-graph/config.json");
    }
    PathBuf::from("mlsetup-graph.json")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempdir().unwrap();
        let cfg = load_config(&dir.path().join("nope.json")).unwrap();
        assert_eq!(cfg, SynthesisConfig::default());
        assert_eq!(cfg.image_format, "png");
    }

    #[test]
    fn round_trips_through_disk() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested/config.json");
        let mut cfg = SynthesisConfig::default();
        cfg.merge(Some("/proj".into()), Some("/depot".into()), Some(".TGA".into()));
        save_config(&path, &cfg).unwrap();
        let back = load_config(&path).unwrap();
        assert_eq!(back.image_format, "tga");
        assert_eq!(back.depot_root.as_deref(), Some(Path::new("/depot")));
    }

    #[test]
    fn partial_file_fills_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("c.json");
        fs::write(&path, r#"{"version": 1, "depot_root": "/d"}"#).unwrap();
        let cfg = load_config(&path).unwrap();
        assert_eq!(cfg.image_format, "png");
        assert!(cfg.project_root.is_none());
    }

    #[test]
    fn invalid_json_is_an_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("c.json");
        fs::write(&path, "{").unwrap();
        assert!(load_config(&path).is_err());
    }
}
