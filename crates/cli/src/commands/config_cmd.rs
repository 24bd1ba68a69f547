//! `tellerline config`: Print the effective configuration.

use tellerline_config::AppConfig;

pub fn run(config: &AppConfig) {
    println!("# Config file: {}", AppConfig::config_path().display());
    print!("{}", config.redacted_toml());
}
