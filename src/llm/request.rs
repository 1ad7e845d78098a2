//! Request and decision types exchanged with callers of the router.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::llm::classifier::Complexity;

/// What the caller wants the model to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationType {
    /// Turn a free-form utterance into an app intent ("create task", ...).
    IntentDetection,
    /// Break down or enrich a single task.
    TaskAnalysis,
    /// Re-plan a calendar; results depend on live state and are never cached.
    ScheduleOptimization,
    /// Morning summary of the day's tasks and events.
    DailyBriefing,
}

impl OperationType {
    pub const ALL: [OperationType; 4] = [
        OperationType::IntentDetection,
        OperationType::TaskAnalysis,
        OperationType::ScheduleOptimization,
        OperationType::DailyBriefing,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::IntentDetection => "intent_detection",
            Self::TaskAnalysis => "task_analysis",
            Self::ScheduleOptimization => "schedule_optimization",
            Self::DailyBriefing => "daily_briefing",
        }
    }

    /// Operations whose output is parsed as JSON by the domain layer.
    pub fn expects_json(&self) -> bool {
        matches!(self, Self::IntentDetection | Self::ScheduleOptimization)
    }
}

impl std::str::FromStr for OperationType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "intent_detection" | "intent" => Ok(Self::IntentDetection),
            "task_analysis" | "analysis" => Ok(Self::TaskAnalysis),
            "schedule_optimization" | "schedule" => Ok(Self::ScheduleOptimization),
            "daily_briefing" | "briefing" => Ok(Self::DailyBriefing),
            _ => Err(format!(
                "invalid operation '{}', expected one of: intent_detection, task_analysis, schedule_optimization, daily_briefing",
                s
            )),
        }
    }
}

impl std::fmt::Display for OperationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Caller's subscription level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionTier {
    Free,
    Pro,
    Team,
}

impl SubscriptionTier {
    pub fn is_paying(&self) -> bool {
        !matches!(self, Self::Free)
    }
}

impl std::str::FromStr for SubscriptionTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "free" => Ok(Self::Free),
            "pro" | "premium" => Ok(Self::Pro),
            "team" | "business" => Ok(Self::Team),
            _ => Err(format!(
                "invalid subscription tier '{}', expected one of: free, pro, team",
                s
            )),
        }
    }
}

impl std::fmt::Display for SubscriptionTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Free => write!(f, "free"),
            Self::Pro => write!(f, "pro"),
            Self::Team => write!(f, "team"),
        }
    }
}

/// A single generative request from the domain layer.
#[derive(Debug, Clone)]
pub struct RouteRequest {
    pub prompt: String,
    pub operation: OperationType,
    pub tier: SubscriptionTier,
    pub timestamp: DateTime<Utc>,
}

impl RouteRequest {
    pub fn new(prompt: impl Into<String>, operation: OperationType, tier: SubscriptionTier) -> Self {
        Self {
            prompt: prompt.into(),
            operation,
            tier,
            timestamp: Utc::now(),
        }
    }
}

/// Successful outcome of `route()`.
#[derive(Debug, Clone)]
pub struct RouteDecision {
    /// Normalized model output.
    pub text: String,
    pub chosen_provider: String,
    pub chosen_model: String,
    pub complexity: Complexity,
    pub cache_hit: bool,
    /// Backoff-and-retry cycles spent across the chain (0 = first try).
    pub retry_count: u32,
    pub latency_ms: u64,
    pub estimated_cost_usd: Decimal,
}
