use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::severity::Level;

pub const CARD_SCHEMA_VERSION: &str = "ui-ready-v1";
pub const FEED_SCHEMA_VERSION: &str = "ui-ready-feed-v1";

/// Impact tier attached to a narrative driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ImpactTier {
    Low,
    Medium,
    High,
}

/// Effort estimate on a suggested action, ordered cheapest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Effort {
    Low,
    Medium,
    High,
}

impl Effort {
    pub fn rank(self) -> u8 {
        match self {
            Effort::Low => 0,
            Effort::Medium => 1,
            Effort::High => 2,
        }
    }

    /// Lenient parse for effort strings found in card artifacts.
    /// Anything unrecognized normalizes to Medium.
    pub fn parse_lossy(value: &str) -> Effort {
        match value.trim().to_lowercase().as_str() {
            "low" => Effort::Low,
            "high" => Effort::High,
            _ => Effort::Medium,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Effort::Low => "Low",
            Effort::Medium => "Medium",
            Effort::High => "High",
        }
    }
}

/// Per-action urgency bucket, distinct from card severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Urgency {
    Now,
    #[serde(rename = "Next 3h")]
    Next3h,
    Monitor,
}

impl Urgency {
    pub fn rank(self) -> u8 {
        match self {
            Urgency::Now => 0,
            Urgency::Next3h => 1,
            Urgency::Monitor => 2,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Urgency::Now => "Now",
            Urgency::Next3h => "Next 3h",
            Urgency::Monitor => "Monitor",
        }
    }
}

/// Confidence is a label for the traffic-driven scorers and a 0–1 fraction
/// for the macro scorer; both shapes are part of the card contract.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Confidence {
    Label(ConfidenceLabel),
    Fraction(f64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfidenceLabel {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceWindow {
    pub start: String,
    pub end: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Driver {
    pub label: String,
    pub impact: ImpactTier,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuggestedAction {
    pub action: String,
    pub when: String,
    pub why: String,
    pub effort: Effort,
    pub tradeoff: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Status {
    pub level: Level,
    pub icon: String,
    pub score_0_100: i64,
    pub subtitle: String,
    pub confidence: Confidence,
    pub confidence_reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Insight {
    pub id: String,
    pub title: String,
    pub category: String,
    pub time_horizon: String,
    pub status: Status,
    pub summary: String,
    pub drivers: Vec<Driver>,
    pub implications: Vec<String>,
    pub supported_considerations: Vec<String>,
    pub suggested_actions: Vec<SuggestedAction>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outlook: Option<String>,
    pub trust_note: String,
}

/// One scorer's output artifact. `_internal` carries the raw signal snapshot
/// for auditability and is outside the UI consumption contract.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Card {
    pub schema_version: String,
    pub site_id: String,
    pub site_name: String,
    pub generated_at_local: String,
    pub service_window_local: ServiceWindow,
    pub insight: Insight,
    #[serde(rename = "_internal", default, skip_serializing_if = "Option::is_none")]
    pub internal: Option<Value>,
}

/// Back-reference from a ranked action to the card it came from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionSource {
    pub insight_id: String,
    pub insight_title: String,
    pub category: String,
    pub status_level: Level,
    pub score_0_100: Option<i64>,
    pub generated_at_local: Option<String>,
}

/// An action pulled out of a card's insight and enriched for ranking.
/// Exists only inside the rollup pipeline and the feed's `top_actions`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankedAction {
    pub action: String,
    pub when: Option<String>,
    pub why: Option<String>,
    pub urgency: Urgency,
    pub effort: Effort,
    pub tradeoff: Option<String>,
    pub source: ActionSource,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelCounts {
    #[serde(rename = "Normal")]
    pub normal: u32,
    #[serde(rename = "Watch")]
    pub watch: u32,
    #[serde(rename = "Elevated")]
    pub elevated: u32,
    #[serde(rename = "Critical")]
    pub critical: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rollups {
    pub overall_status: Level,
    pub counts_by_level: LevelCounts,
    pub top_actions: Vec<RankedAction>,
    pub urgency_summary: String,
    pub summary: String,
}

/// The aggregate root served to the UI. Cards are carried through as raw
/// JSON so the feed never rewrites what a scorer emitted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Feed {
    pub schema_version: String,
    pub site_id: String,
    pub site_name: String,
    pub generated_at_local: String,
    pub cards: Vec<Value>,
    pub rollups: Rollups,
}
