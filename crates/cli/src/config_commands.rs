use {anyhow::Result, clap::Subcommand, relay_config::RelayConfig};

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Print the effective configuration as TOML.
    Show,
    /// Print the path of the config file in use.
    Path,
}

pub fn handle_config(action: ConfigAction, config: &RelayConfig) -> Result<()> {
    match action {
        ConfigAction::Show => print!("{}", render(config)?),
        ConfigAction::Path => println!("{}", relay_config::find_or_default_config_path().display()),
    }
    Ok(())
}

fn render(config: &RelayConfig) -> Result<String> {
    Ok(toml::to_string_pretty(config)?)
}
