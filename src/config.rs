use std::path::Path;

use anyhow::Context;
use chrono::FixedOffset;
use serde::Deserialize;

use crate::models::ServiceWindow;

/// Site configuration loaded from a JSON file. Every field has a default so
/// a minimal config (or none of the optional sections) still scores.
#[derive(Debug, Clone, Deserialize)]
pub struct SiteConfig {
    #[serde(default = "default_site_id")]
    pub site_id: String,
    #[serde(default = "default_site_name")]
    pub site_name: String,
    /// Whole-hour UTC offset for local timestamps, e.g. -5.
    #[serde(default = "default_tz_offset")]
    pub tz_offset_hours: i32,
    #[serde(default = "default_service_window")]
    pub service_window: HourWindow,
    #[serde(default = "default_peak_window")]
    pub peak_window: HourWindow,
    #[serde(default)]
    pub macro_series: MacroSeries,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct HourWindow {
    pub start_hour: u32,
    pub end_hour: u32,
}

impl HourWindow {
    /// Same-day window, start inclusive, end exclusive.
    pub fn contains_hour(&self, hour: u32) -> bool {
        self.start_hour <= hour && hour < self.end_hour
    }

    pub fn label(&self) -> String {
        format!("{}–{}", hhmm(self.start_hour), hhmm(self.end_hour))
    }
}

/// Series codes in the upstream macro store. Defaults match the national
/// statistics series the fetchers persist.
#[derive(Debug, Clone, Deserialize)]
pub struct MacroSeries {
    #[serde(default = "default_food_series")]
    pub food_inflation: String,
    #[serde(default = "default_transport_series")]
    pub transport_inflation: String,
    #[serde(default = "default_fx_series")]
    pub fx_rate: String,
}

impl Default for MacroSeries {
    fn default() -> Self {
        MacroSeries {
            food_inflation: default_food_series(),
            transport_inflation: default_transport_series(),
            fx_rate: default_fx_series(),
        }
    }
}

impl SiteConfig {
    pub fn load(path: &Path) -> anyhow::Result<SiteConfig> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        let cfg: SiteConfig = serde_json::from_str(&raw)
            .with_context(|| format!("config {} is not valid JSON", path.display()))?;
        Ok(cfg)
    }

    pub fn local_offset(&self) -> FixedOffset {
        FixedOffset::east_opt(self.tz_offset_hours * 3600)
            .unwrap_or_else(|| FixedOffset::east_opt(0).unwrap())
    }

    pub fn service_window_local(&self) -> ServiceWindow {
        ServiceWindow {
            start: hhmm(self.service_window.start_hour),
            end: hhmm(self.service_window.end_hour),
        }
    }
}

pub fn hhmm(hour: u32) -> String {
    format!("{hour:02}:00")
}

fn default_site_id() -> String {
    "unknown_site".to_string()
}

fn default_site_name() -> String {
    "Unknown Site".to_string()
}

fn default_tz_offset() -> i32 {
    -5
}

fn default_service_window() -> HourWindow {
    HourWindow {
        start_hour: 16,
        end_hour: 23,
    }
}

fn default_peak_window() -> HourWindow {
    HourWindow {
        start_hour: 19,
        end_hour: 22,
    }
}

fn default_food_series() -> String {
    "PN09822PM".to_string()
}

fn default_transport_series() -> String {
    "PN01310PM".to_string()
}

fn default_fx_series() -> String {
    "PD04638PD".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_uses_defaults() {
        let cfg: SiteConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg.site_id, "unknown_site");
        assert_eq!(cfg.tz_offset_hours, -5);
        assert_eq!(cfg.service_window.start_hour, 16);
        assert_eq!(cfg.peak_window.end_hour, 22);
        assert_eq!(cfg.macro_series.fx_rate, "PD04638PD");
    }

    #[test]
    fn hour_window_is_end_exclusive() {
        let w = HourWindow {
            start_hour: 19,
            end_hour: 22,
        };
        assert!(w.contains_hour(19));
        assert!(w.contains_hour(21));
        assert!(!w.contains_hour(22));
        assert!(!w.contains_hour(3));
        assert_eq!(w.label(), "19:00–22:00");
    }

    #[test]
    fn service_window_renders_hhmm() {
        let cfg: SiteConfig = serde_json::from_str("{}").unwrap();
        let w = cfg.service_window_local();
        assert_eq!(w.start, "16:00");
        assert_eq!(w.end, "23:00");
    }
}
