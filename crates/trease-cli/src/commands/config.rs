/// Configuration command handlers
use anyhow::Result;
use clap::Subcommand;
use trease_core::config::MonitorConfig;

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Print the effective configuration as TOML
    Show,
    /// Print the path of the configuration file
    Path,
}

pub fn handle_config_command(action: ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Show => {
            let path = MonitorConfig::default_path()?;
            let config = MonitorConfig::load(&path)?;
            if !path.exists() {
                println!("# {} not found, showing defaults\n", path.display());
            }
            print!("{}", config.to_toml()?);
        }
        ConfigAction::Path => println!("{}", MonitorConfig::default_path()?.display()),
    }
    Ok(())
}
