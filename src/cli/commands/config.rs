//! `config` command: print the effective configuration.

use anyhow::{Context, Result};
use serde::Serialize;

use crate::cli::output::{output, CommandOutput};
use crate::domain::models::Config;

/// Configuration after defaults, files and `REFINERY_` overrides are merged.
#[derive(Debug, Serialize)]
#[serde(transparent)]
pub struct ConfigOutput {
    pub config: Config,
}

impl CommandOutput for ConfigOutput {
    fn to_human(&self) -> String {
        serde_yaml::to_string(&self.config)
            .unwrap_or_else(|e| format!("# failed to render configuration: {e}"))
    }
}

pub fn show(config: Config, json_mode: bool) -> Result<()> {
    let out = ConfigOutput { config };
    serde_yaml::to_string(&out.config).context("Failed to render configuration")?;
    output(&out, json_mode);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_output_renders_yaml_and_json() {
        let out = ConfigOutput {
            config: Config::default(),
        };

        let yaml = out.to_human();
        assert!(yaml.contains("rig:"));
        assert!(yaml.contains("poll_interval_secs: 30"));

        let parsed: Config = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(parsed.rig.name, out.config.rig.name);

        let json = out.to_json();
        assert_eq!(json["daemon"]["poll_interval_secs"], 30);
    }
}
