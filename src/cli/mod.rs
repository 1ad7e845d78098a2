//! Command-line interface.
//!
//! Commands:
//! - `classify <prompt>`: show the complexity tier and matched signals
//! - `route <prompt>`: send a request through the router
//! - `stats`: print router diagnostics as JSON
//! - `invalidate-cache`: clear both cache tiers
//! - `settings ...`: view and edit the settings file

mod settings;

pub use settings::{SettingsCommand, run_settings_command};

use std::sync::Arc;

use clap::{Parser, Subcommand};

use crate::clock::SystemClock;
use crate::config::Config;
use crate::llm::classifier::ComplexityClassifier;
use crate::llm::classifier::ClassifierConfig;
use crate::llm::request::{OperationType, RouteRequest, SubscriptionTier};
use crate::llm::{Router, create_router};
use crate::settings::Settings;

#[derive(Parser, Debug)]
#[command(name = "calendar-ai")]
#[command(about = "Complexity-aware, failure-tolerant model routing for calendar and task assistants")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Emit logs as JSON (same as LOG_FORMAT=json)
    #[arg(long, global = true)]
    pub json_logs: bool,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Classify a prompt without calling any model
    Classify {
        /// Prompt text
        prompt: String,
    },

    /// Route a prompt to a model and print the answer
    Route {
        /// Prompt text
        prompt: String,

        /// Operation type (intent_detection, task_analysis, schedule_optimization, daily_briefing)
        #[arg(short, long, default_value = "task_analysis")]
        op: OperationType,

        /// Caller subscription tier (free, pro, team)
        #[arg(short, long, default_value = "free")]
        tier: SubscriptionTier,

        /// Print the full decision as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print router diagnostics
    Stats,

    /// Clear every cached response
    InvalidateCache,

    /// Manage settings
    #[command(subcommand)]
    Settings(SettingsCommand),
}

/// Run a parsed command.
pub async fn run(command: Command) -> anyhow::Result<()> {
    match command {
        Command::Classify { prompt } => {
            let config = Config::from_env()?;
            let classifier = ComplexityClassifier::new(ClassifierConfig {
                complex_min_chars: config.routing.complex_min_chars,
            });
            let complexity = classifier.classify(&prompt);
            println!("{}", serde_json::to_string_pretty(&complexity)?);
        }
        Command::Route {
            prompt,
            op,
            tier,
            json,
        } => {
            let router = build_router().await?;
            let result = router.route(RouteRequest::new(prompt, op, tier)).await;
            router.flush_metrics();
            let decision = result?;
            if json {
                let out = serde_json::json!({
                    "text": decision.text,
                    "chosen_provider": decision.chosen_provider,
                    "chosen_model": decision.chosen_model,
                    "complexity": decision.complexity,
                    "cache_hit": decision.cache_hit,
                    "retry_count": decision.retry_count,
                    "latency_ms": decision.latency_ms,
                    "estimated_cost_usd": decision.estimated_cost_usd.to_string(),
                });
                println!("{}", serde_json::to_string_pretty(&out)?);
            } else {
                println!("{}", decision.text);
                eprintln!(
                    "[{} / {}] complexity={} cache_hit={} retries={} latency={}ms cost=${}",
                    decision.chosen_provider,
                    decision.chosen_model,
                    decision.complexity.tier,
                    decision.cache_hit,
                    decision.retry_count,
                    decision.latency_ms,
                    decision.estimated_cost_usd
                );
            }
        }
        Command::Stats => {
            let router = build_router().await?;
            println!("{}", serde_json::to_string_pretty(&router.get_stats())?);
        }
        Command::InvalidateCache => {
            let router = build_router().await?;
            router.invalidate_cache().await;
            println!("Response cache cleared");
        }
        Command::Settings(cmd) => run_settings_command(cmd)?,
    }
    Ok(())
}

async fn build_router() -> anyhow::Result<Router> {
    let config = Config::from_env()?;
    let router = create_router(&config, Settings::load(), Arc::new(SystemClock)).await?;
    Ok(router)
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn route_arguments_parse() {
        let cli = Cli::try_parse_from([
            "calendar-ai",
            "route",
            "plan my week",
            "--op",
            "schedule",
            "--tier",
            "pro",
        ])
        .unwrap();
        match cli.command {
            Command::Route { op, tier, json, .. } => {
                assert_eq!(op, OperationType::ScheduleOptimization);
                assert_eq!(tier, SubscriptionTier::Pro);
                assert!(!json);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn settings_subcommand_parses() {
        let cli =
            Cli::try_parse_from(["calendar-ai", "settings", "set", "routing_enabled", "false"])
                .unwrap();
        assert!(matches!(cli.command, Command::Settings(SettingsCommand::Set { .. })));
    }
}
