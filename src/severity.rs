use serde::{Deserialize, Serialize};

pub const ALLOWED_LEVELS: [&str; 4] = ["Normal", "Watch", "Elevated", "Critical"];

/// Severity of a risk card, ordered from calmest to worst.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Level {
    Normal,
    Watch,
    Elevated,
    Critical,
}

impl Level {
    pub fn rank(self) -> u8 {
        match self {
            Level::Normal => 0,
            Level::Watch => 1,
            Level::Elevated => 2,
            Level::Critical => 3,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Level::Normal => "Normal",
            Level::Watch => "Watch",
            Level::Elevated => "Elevated",
            Level::Critical => "Critical",
        }
    }

    /// Presentation glyph. Never used in scoring logic.
    pub fn icon(self) -> &'static str {
        match self {
            Level::Normal => "🟢",
            Level::Watch => "🟡",
            Level::Elevated => "🟠",
            Level::Critical => "🔴",
        }
    }

    /// Lenient mapping from a level string found in a card artifact.
    /// Unrecognized levels fall back to Normal so one odd card cannot
    /// break downstream consumers.
    pub fn parse_lossy(value: &str) -> Level {
        match value {
            "Watch" => Level::Watch,
            "Elevated" => Level::Elevated,
            "Critical" => Level::Critical,
            _ => Level::Normal,
        }
    }
}

/// Score thresholds shared by every scorer. An explicit value rather than a
/// module constant so tests can exercise alternate threshold sets.
#[derive(Debug, Clone, Copy)]
pub struct Thresholds {
    pub watch_min: i64,
    pub elevated_min: i64,
    pub critical_min: i64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Thresholds {
            watch_min: 25,
            elevated_min: 50,
            critical_min: 75,
        }
    }
}

pub fn clamp_score(score: i64) -> i64 {
    score.clamp(0, 100)
}

/// Global mapping from numeric score to level. Total: the score is clamped
/// to [0, 100] first, and the threshold bands neither overlap nor leave gaps.
pub fn classify(score: i64, thresholds: &Thresholds) -> Level {
    let s = clamp_score(score);
    if s >= thresholds.critical_min {
        Level::Critical
    } else if s >= thresholds.elevated_min {
        Level::Elevated
    } else if s >= thresholds.watch_min {
        Level::Watch
    } else {
        Level::Normal
    }
}
