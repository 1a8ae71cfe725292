//! Configuration file parsing for `weft.toml`.
//!
//! Searches the current directory and then its ancestors. Missing files
//! yield the defaults.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use weft_vm::RuntimeConfig;

pub const CONFIG_FILE: &str = "weft.toml";

#[derive(Debug, Deserialize, Serialize, Default, Clone, PartialEq)]
pub struct WeftConfig {
    #[serde(default)]
    pub runtime: RuntimeConfig,
    /// Template-only components: component name -> layout block.
    #[serde(default)]
    pub components: BTreeMap<String, String>,
    #[serde(default)]
    pub render: RenderSection,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct RenderSection {
    /// Tag of the element the program renders into.
    pub root_tag: String,
    /// Print mutation statistics as JSON instead of a summary line.
    pub json_stats: bool,
}

impl Default for RenderSection {
    fn default() -> Self {
        Self {
            root_tag: "div".to_string(),
            json_stats: false,
        }
    }
}

impl WeftConfig {
    /// Load config from `weft.toml`, searching the current dir then parents.
    pub fn load() -> Self {
        Self::load_with_path().map(|(_, cfg)| cfg).unwrap_or_default()
    }

    pub fn load_with_path() -> Option<(PathBuf, Self)> {
        let dir = std::env::current_dir().ok()?;
        Self::find_from(&dir)
    }

    pub fn load_from(path: &Path) -> Result<Self, String> {
        let content = std::fs::read_to_string(path).map_err(|e| format!("cannot read '{}': {}", path.display(), e))?;
        Self::parse(&content).map_err(|e| format!("invalid toml in '{}': {}", path.display(), e))
    }

    /// Walks from `start` up to the filesystem root looking for `weft.toml`.
    /// A file that exists but fails to parse stops the search.
    pub fn find_from(start: &Path) -> Option<(PathBuf, Self)> {
        let mut dir = start.to_path_buf();
        loop {
            let candidate = dir.join(CONFIG_FILE);
            if candidate.exists() {
                match Self::load_from(&candidate) {
                    Ok(cfg) => return Some((candidate, cfg)),
                    Err(message) => {
                        tracing::warn!(%message, "ignoring unreadable config");
                        return None;
                    }
                }
            }
            if !dir.pop() {
                return None;
            }
        }
    }

    pub fn parse(source: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(source)
    }

    pub fn default_template() -> &'static str {
        r#"# Weft configuration

[runtime]
# max_instructions = 10000000
# interactive = true
# trusting_urls = false
# log_level = "weft_vm=debug"

[render]
# root_tag = "div"
# json_stats = false

# Template-only components: name = "layout block"
[components]
# Greeting = "greeting"
"#
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn empty_config_uses_defaults() {
        let cfg = WeftConfig::parse("").unwrap();
        assert_eq!(cfg, WeftConfig::default());
        assert_eq!(cfg.render.root_tag, "div");
        assert!(cfg.runtime.interactive);
    }

    #[test]
    fn parse_runtime_and_components() {
        let cfg = WeftConfig::parse(
            r#"
[runtime]
max_instructions = 500
interactive = false
log_level = "weft_vm=trace"

[render]
root_tag = "main"

[components]
Greeting = "greeting"
"#,
        )
        .unwrap();
        assert_eq!(cfg.runtime.max_instructions, 500);
        assert!(!cfg.runtime.interactive);
        assert!(!cfg.runtime.trusting_urls);
        assert_eq!(cfg.runtime.log_level.as_deref(), Some("weft_vm=trace"));
        assert_eq!(cfg.render.root_tag, "main");
        assert!(!cfg.render.json_stats);
        assert_eq!(cfg.components.get("Greeting").map(String::as_str), Some("greeting"));
    }

    #[test]
    fn template_parses() {
        let cfg = WeftConfig::parse(WeftConfig::default_template()).unwrap();
        assert_eq!(cfg, WeftConfig::default());
    }

    #[test]
    fn search_walks_up_to_ancestors() {
        let base = std::env::temp_dir().join(format!("weft-config-search-{}", std::process::id()));
        let nested = base.join("a").join("b");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(base.join(CONFIG_FILE), "[render]\nroot_tag = \"section\"\n").unwrap();

        let (path, cfg) = WeftConfig::find_from(&nested).unwrap();
        assert_eq!(path, base.join(CONFIG_FILE));
        assert_eq!(cfg.render.root_tag, "section");

        std::fs::remove_dir_all(&base).unwrap();
    }

    #[test]
    fn load_from_reports_bad_toml() {
        let base = std::env::temp_dir().join(format!("weft-config-bad-{}", std::process::id()));
        std::fs::create_dir_all(&base).unwrap();
        let path = base.join(CONFIG_FILE);
        std::fs::write(&path, "[runtime\n").unwrap();
        let err = WeftConfig::load_from(&path).unwrap_err();
        assert!(err.starts_with("invalid toml"), "{}", err);
        std::fs::remove_dir_all(&base).unwrap();
    }
}
