//! Agent configuration loaded from environment variables and config files.
//!
//! Config precedence: env vars > .env file > agent.toml > defaults.
//! Environment overrides use the `FLASHLOCK_AGENT_` prefix, e.g.
//! `FLASHLOCK_AGENT_SERVER__BASE_URL=https://flash.example.com` or
//! `FLASHLOCK_AGENT_TOOLS__ENFORCE_INTEGRITY=true`.

use serde::Deserialize;
use std::collections::HashMap;

use crate::error::Result;

#[derive(Debug, Deserialize, Clone)]
pub struct AgentConfig {
    pub server: ServerConfig,
    pub tools: ToolsConfig,
    pub keys: KeysConfig,
    /// Device type → native tool and argument template. `{artifact-name}`
    /// placeholders are substituted with materialized file paths.
    #[serde(default)]
    pub devices: HashMap<String, DeviceTool>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub base_url: String,
    /// Per-request timeout. Minutes-scale to tolerate large transfers; the
    /// session TTL is the hard upper bound anyway.
    pub timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ToolsConfig {
    /// Directory the flashing binaries live in.
    pub dir: String,
    /// When true, a tool whose SHA-256 is not on the allowlist never runs.
    /// When false the hash is logged and the tool passes — development only.
    pub enforce_integrity: bool,
    /// Known-good SHA-256 hashes (lowercase hex) of flashing binaries.
    #[serde(default)]
    pub allowlist: Vec<String>,
    /// Secure-overwrite passes for materialized firmware files.
    pub wipe_passes: u32,
}

#[derive(Debug, Deserialize, Clone)]
pub struct KeysConfig {
    /// RSA modulus size for the client keypair.
    pub bits: usize,
    /// Override for the key storage directory; defaults to the user's
    /// local application-data area.
    #[serde(default)]
    pub data_dir: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DeviceTool {
    pub tool: String,
    pub args: String,
}

impl AgentConfig {
    /// Load configuration, optionally from an explicit file path.
    pub fn load(file: Option<&str>) -> Result<Self> {
        let _ = dotenvy::dotenv();

        let mut builder = config::Config::builder()
            .set_default("server.base_url", "http://localhost:8470")?
            .set_default("server.timeout_secs", 600)?
            .set_default("tools.dir", "./tools")?
            .set_default("tools.enforce_integrity", false)?
            .set_default("tools.wipe_passes", 3)?
            .set_default("keys.bits", 2048)?
            .add_source(config::File::with_name("agent").required(false));

        if let Some(path) = file {
            builder = builder.add_source(config::File::with_name(path).required(true));
        }

        let cfg = builder
            .add_source(
                config::Environment::with_prefix("FLASHLOCK_AGENT")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let mut agent_config: AgentConfig = cfg.try_deserialize()?;
        agent_config.ensure_default_devices();
        Ok(agent_config)
    }

    /// The built-in tool table for the known device families. Config entries
    /// win; these only fill gaps.
    fn ensure_default_devices(&mut self) {
        let defaults = [
            (
                "MTK6580",
                DeviceTool {
                    tool: "mtk_flash".into(),
                    args: "-i {system.bin} -l {usbloader-5577.bin}".into(),
                },
            ),
            (
                "QC9008",
                DeviceTool {
                    tool: "qdl".into(),
                    args: "--firehose {firehose.mbn} --program {rawprogram.xml} --patch {patch.xml}"
                        .into(),
                },
            ),
        ];
        for (device_type, tool) in defaults {
            self.devices.entry(device_type.to_owned()).or_insert(tool);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_fill_missing_device_entries() {
        let mut cfg = AgentConfig {
            server: ServerConfig {
                base_url: "http://localhost:8470".into(),
                timeout_secs: 600,
            },
            tools: ToolsConfig {
                dir: "./tools".into(),
                enforce_integrity: false,
                allowlist: vec![],
                wipe_passes: 3,
            },
            keys: KeysConfig {
                bits: 2048,
                data_dir: None,
            },
            devices: HashMap::from([(
                "MTK6580".to_owned(),
                DeviceTool {
                    tool: "custom_flash".into(),
                    args: "{system.bin}".into(),
                },
            )]),
        };
        cfg.ensure_default_devices();

        // Explicit entry kept, missing family filled in.
        assert_eq!(cfg.devices["MTK6580"].tool, "custom_flash");
        assert_eq!(cfg.devices["QC9008"].tool, "qdl");
    }
}
