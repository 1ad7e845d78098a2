//! Settings CLI commands.
//!
//! Settings live in `~/.calendar-ai/settings.toml`. Paths are
//! `routing_enabled`, `selected_provider` and `operations.<operation>`.

use clap::Subcommand;

use crate::llm::request::OperationType;
use crate::settings::Settings;

#[derive(Subcommand, Debug, Clone)]
pub enum SettingsCommand {
    /// Show all settings and their current values
    List,

    /// Get a specific setting value
    Get {
        /// Setting path (e.g., "operations.daily_briefing")
        path: String,
    },

    /// Set a setting value
    Set {
        /// Setting path (e.g., "routing_enabled")
        path: String,

        /// Value to set
        value: String,
    },

    /// Reset all settings to their defaults
    Reset,

    /// Show the settings file location
    Path,
}

/// Run a settings command against the default settings file.
pub fn run_settings_command(cmd: SettingsCommand) -> anyhow::Result<()> {
    let path = Settings::default_path();
    match cmd {
        SettingsCommand::List => {
            let settings = Settings::load_from(&path)?;
            for (key, value) in list(&settings) {
                println!("{key} = {value}");
            }
        }
        SettingsCommand::Get { path: key } => {
            let settings = Settings::load_from(&path)?;
            let value = get(&settings, &key)
                .ok_or_else(|| anyhow::anyhow!("unknown setting '{}'", key))?;
            println!("{value}");
        }
        SettingsCommand::Set { path: key, value } => {
            let mut settings = Settings::load_from(&path)?;
            set(&mut settings, &key, &value)?;
            settings.save_to(&path)?;
            println!("{key} = {}", get(&settings, &key).unwrap_or_default());
        }
        SettingsCommand::Reset => {
            Settings::default().save_to(&path)?;
            println!("Settings reset to defaults");
        }
        SettingsCommand::Path => println!("{}", path.display()),
    }
    Ok(())
}

fn list(settings: &Settings) -> Vec<(String, String)> {
    let mut out = vec![
        ("routing_enabled".to_string(), settings.routing_enabled.to_string()),
        (
            "selected_provider".to_string(),
            settings.selected_provider.clone().unwrap_or_else(|| "(none)".to_string()),
        ),
    ];
    for op in OperationType::ALL {
        out.push((
            format!("operations.{}", op),
            settings.is_operation_enabled(op).to_string(),
        ));
    }
    out
}

fn get(settings: &Settings, path: &str) -> Option<String> {
    list(settings)
        .into_iter()
        .find(|(key, _)| key == path)
        .map(|(_, value)| value)
}

fn set(settings: &mut Settings, path: &str, value: &str) -> anyhow::Result<()> {
    match path {
        "routing_enabled" => settings.routing_enabled = parse_bool(value)?,
        "selected_provider" => {
            settings.selected_provider = match value {
                "" | "none" => None,
                id => Some(id.to_string()),
            }
        }
        other => {
            let op = other
                .strip_prefix("operations.")
                .ok_or_else(|| anyhow::anyhow!("unknown setting '{}'", other))?
                .parse::<OperationType>()
                .map_err(|e| anyhow::anyhow!(e))?;
            settings.set_operation_enabled(op, parse_bool(value)?);
        }
    }
    Ok(())
}

fn parse_bool(value: &str) -> anyhow::Result<bool> {
    match value.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => anyhow::bail!("expected a boolean, got '{}'", value),
    }
}
