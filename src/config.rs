//! Registry configuration: data directory and root → base-directory mapping

use crate::error::{RegistryError, RegistryResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf, MAIN_SEPARATOR};
use strum::{Display, EnumString};
use tracing::info;

/// Top-level buckets of directories the registry watches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum RootType {
    Models,
    Input,
    Output,
}

impl RootType {
    pub const ALL: [RootType; 3] = [RootType::Models, RootType::Input, RootType::Output];
}

/// Registry configuration. Serializes to/from TOML.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Directory holding the database and upload spool
    pub data_dir: PathBuf,

    /// Database file name inside `data_dir`
    #[serde(default = "default_database_file")]
    pub database_file: String,

    /// Model category name → base directories (e.g. "checkpoints", "loras")
    #[serde(default)]
    pub models: BTreeMap<String, Vec<PathBuf>>,

    /// Base directories for user inputs
    #[serde(default)]
    pub input: Vec<PathBuf>,

    /// Base directories for generated outputs
    #[serde(default)]
    pub output: Vec<PathBuf>,
}

fn default_database_file() -> String {
    "assets.db".to_string()
}

impl RegistryConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> RegistryResult<Self> {
        let raw = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&raw)
            .map_err(|e| RegistryError::Validation(format!("invalid config: {e}")))?;
        info!("Loaded registry config from {}", path.display());
        Ok(config)
    }

    /// Minimal configuration rooted at `data_dir`, used by tests and by the
    /// server when no config file exists yet.
    pub fn with_data_dir(data_dir: PathBuf) -> Self {
        Self {
            data_dir,
            database_file: default_database_file(),
            models: BTreeMap::new(),
            input: Vec::new(),
            output: Vec::new(),
        }
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join(&self.database_file)
    }

    /// Absolute base directories belonging to one root.
    pub fn prefixes_for_root(&self, root: RootType) -> Vec<PathBuf> {
        match root {
            RootType::Models => self
                .models
                .values()
                .flat_map(|dirs| dirs.iter().cloned())
                .collect(),
            RootType::Input => self.input.clone(),
            RootType::Output => self.output.clone(),
        }
    }

    /// Every base directory across all roots.
    pub fn all_known_prefixes(&self) -> Vec<PathBuf> {
        RootType::ALL
            .iter()
            .flat_map(|r| self.prefixes_for_root(*r))
            .collect()
    }

    /// Model category directories paired with their category names, used by
    /// discovery to derive tags.
    pub fn model_category_dirs(&self) -> Vec<(String, PathBuf)> {
        self.models
            .iter()
            .flat_map(|(category, dirs)| {
                dirs.iter().map(move |d| (category.clone(), d.clone()))
            })
            .collect()
    }

    /// Resolve the upload destination from the leading tags.
    ///
    /// `["models", "<category>", …rest]` lands in the category's first base
    /// directory; `["input"|"output", …rest]` in the root's first base
    /// directory. The remaining tags become subdirectories.
    pub fn destination_for_tags(&self, tags: &[String]) -> RegistryResult<(PathBuf, Vec<String>)> {
        let first = tags
            .first()
            .ok_or_else(|| RegistryError::Validation("tags must name a destination root".into()))?;
        match first.as_str() {
            "models" => {
                let category = tags.get(1).ok_or_else(|| {
                    RegistryError::Validation("models uploads need a category tag".into())
                })?;
                let base = self
                    .models
                    .get(category)
                    .and_then(|dirs| dirs.first())
                    .ok_or_else(|| {
                        RegistryError::Validation(format!("unknown models category '{category}'"))
                    })?;
                Ok((base.clone(), tags[2..].to_vec()))
            }
            "input" | "output" => {
                let dirs = if first == "input" { &self.input } else { &self.output };
                let base = dirs.first().ok_or_else(|| {
                    RegistryError::Validation(format!("no directory configured for root '{first}'"))
                })?;
                Ok((base.clone(), tags[1..].to_vec()))
            }
            other => Err(RegistryError::Validation(format!(
                "tags must start with a root type, got '{other}'"
            ))),
        }
    }
}

/// True when `path` starts with `prefix` followed by a path separator (or is
/// the prefix itself). Byte-wise so symlink tricks cannot widen the match.
pub fn path_has_prefix(path: &Path, prefix: &Path) -> bool {
    let path = path.as_os_str().as_encoded_bytes();
    let prefix = prefix.as_os_str().as_encoded_bytes();
    if path == prefix {
        return true;
    }
    let sep = MAIN_SEPARATOR as u8;
    let prefix_len = if prefix.ends_with(&[sep]) {
        prefix.len()
    } else {
        prefix.len() + 1
    };
    path.len() >= prefix_len
        && path.starts_with(prefix)
        && (prefix.ends_with(&[sep]) || path[prefix.len()] == sep)
}

/// Reject destination paths that escape their base directory. The candidate
/// is normalized component-wise (no `..`, no re-rooting) before the check.
pub fn validate_within_base(candidate: &Path, base: &Path) -> RegistryResult<()> {
    for component in candidate.components() {
        if matches!(component, Component::ParentDir) {
            return Err(RegistryError::Validation(format!(
                "destination escapes base directory: {}",
                candidate.display()
            )));
        }
    }
    if !path_has_prefix(candidate, base) {
        return Err(RegistryError::Validation(format!(
            "destination {} is outside {}",
            candidate.display(),
            base.display()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn config_with_roots() -> RegistryConfig {
        let mut config = RegistryConfig::with_data_dir(PathBuf::from("/data"));
        config
            .models
            .insert("checkpoints".into(), vec![PathBuf::from("/m/checkpoints")]);
        config.models.insert("loras".into(), vec![PathBuf::from("/m/loras")]);
        config.input = vec![PathBuf::from("/in")];
        config.output = vec![PathBuf::from("/out")];
        config
    }

    #[test]
    fn prefixes_cover_all_roots() {
        let config = config_with_roots();
        assert_eq!(
            config.prefixes_for_root(RootType::Models),
            vec![PathBuf::from("/m/checkpoints"), PathBuf::from("/m/loras")]
        );
        assert_eq!(config.all_known_prefixes().len(), 4);
    }

    #[test]
    fn destination_resolution() {
        let config = config_with_roots();
        let (base, subdirs) = config
            .destination_for_tags(&["models".into(), "loras".into(), "sdxl".into()])
            .unwrap();
        assert_eq!(base, PathBuf::from("/m/loras"));
        assert_eq!(subdirs, vec!["sdxl".to_string()]);

        let (base, subdirs) = config.destination_for_tags(&["output".into()]).unwrap();
        assert_eq!(base, PathBuf::from("/out"));
        assert!(subdirs.is_empty());

        assert!(config
            .destination_for_tags(&["models".into(), "nonsense".into()])
            .is_err());
        assert!(config.destination_for_tags(&["weird".into()]).is_err());
    }

    #[test]
    fn prefix_match_requires_separator_boundary() {
        assert!(path_has_prefix(Path::new("/m/loras/x.bin"), Path::new("/m/loras")));
        assert!(!path_has_prefix(Path::new("/m/loras-evil/x.bin"), Path::new("/m/loras")));
        assert!(path_has_prefix(Path::new("/m/loras"), Path::new("/m/loras")));
    }

    #[test]
    fn traversal_is_rejected() {
        assert!(validate_within_base(Path::new("/m/loras/../../etc"), Path::new("/m/loras")).is_err());
        assert!(validate_within_base(Path::new("/m/loras/a/b.bin"), Path::new("/m/loras")).is_ok());
    }

    #[test]
    fn config_roundtrips_through_toml() {
        let config = config_with_roots();
        let raw = toml::to_string(&config).unwrap();
        let parsed: RegistryConfig = toml::from_str(&raw).unwrap();
        assert_eq!(parsed.input, config.input);
        assert_eq!(parsed.models, config.models);
    }
}
