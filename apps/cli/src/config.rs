use std::fs;
use std::path::PathBuf;

use meter_app::MeterSettings;
use meter_app::config::{DEFAULT_RETENTION_DAYS, DEFAULT_TOP_N, DEFAULT_WINDOW_DAYS};
use meter_core::{LatencyHeuristic, PricePair};
use serde::{Deserialize, Serialize};

use crate::dirs;

const CONFIG_FILE_NAME: &str = "config.toml";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<PathBuf>,
    pub default_input_per_1m: f64,
    pub default_output_per_1m: f64,
    pub top_n: usize,
    pub window_days: u32,
    pub retention_days: u32,
    pub latency: LatencyHeuristic,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            default_input_per_1m: PricePair::FALLBACK.input_per_1m,
            default_output_per_1m: PricePair::FALLBACK.output_per_1m,
            top_n: DEFAULT_TOP_N,
            window_days: DEFAULT_WINDOW_DAYS,
            retention_days: DEFAULT_RETENTION_DAYS,
            latency: LatencyHeuristic::default(),
        }
    }
}

impl CliConfig {
    pub fn settings(&self) -> MeterSettings {
        MeterSettings {
            default_price: PricePair {
                input_per_1m: self.default_input_per_1m,
                output_per_1m: self.default_output_per_1m,
            },
            top_n: self.top_n,
            window_days: self.window_days,
            retention_days: self.retention_days,
            latency: self.latency,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ConfigLoad {
    pub config: CliConfig,
    pub file: PathBuf,
    pub created: bool,
}

pub fn load_or_create() -> Result<ConfigLoad, String> {
    let dir = dirs::config_dir()?;
    fs::create_dir_all(&dir)
        .map_err(|err| format!("create config dir {}: {}", dir.display(), err))?;
    let file = dir.join(CONFIG_FILE_NAME);

    if file.exists() {
        let contents = fs::read_to_string(&file)
            .map_err(|err| format!("read config {}: {}", file.display(), err))?;
        let config = parse_config(&contents)
            .map_err(|err| format!("parse config {}: {}", file.display(), err))?;
        return Ok(ConfigLoad {
            config,
            file,
            created: false,
        });
    }

    let config = CliConfig::default();
    let contents =
        toml::to_string_pretty(&config).map_err(|err| format!("serialize config: {}", err))?;
    fs::write(&file, contents)
        .map_err(|err| format!("write config {}: {}", file.display(), err))?;

    Ok(ConfigLoad {
        config,
        file,
        created: true,
    })
}

fn parse_config(contents: &str) -> Result<CliConfig, toml::de::Error> {
    toml::from_str(contents)
}
