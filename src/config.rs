use crate::types::AnalysisError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub const MIN_CELL_SIZE_METERS: u32 = 5;
pub const MAX_CELL_SIZE_METERS: u32 = 20;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub cell_size_meters: u32,
    pub max_search_radius_meters: f64,
    /// Equator-scale conversion used for obstruction query boxes.
    pub meters_per_degree: f64,
    pub default_building_height: f64,
    pub meters_per_level: f64,
    /// Worker threads for cell evaluation; `None` uses every core.
    pub worker_threads: Option<usize>,
    /// Below this many cells evaluation stays on the calling thread.
    pub parallel_threshold: usize,
    pub sun: SunSamplingConfig,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            cell_size_meters: 10,
            max_search_radius_meters: 200.0,
            meters_per_degree: 111_320.0,
            default_building_height: 6.0,
            meters_per_level: 3.0,
            worker_threads: None,
            parallel_threshold: 64,
            sun: SunSamplingConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SunSamplingConfig {
    pub year: i32,
    /// `(month, day)` pairs.
    pub dates: Vec<(u32, u32)>,
    /// Local clock hours.
    pub hours: Vec<u32>,
    /// IANA zone name such as `Europe/Berlin`.
    pub timezone: Option<String>,
    pub utc_offset_hours: Option<i32>,
}

impl Default for SunSamplingConfig {
    fn default() -> Self {
        Self {
            year: 2025,
            dates: vec![(6, 21), (12, 21)],
            hours: vec![9, 12, 15],
            timezone: None,
            utc_offset_hours: None,
        }
    }
}

impl AnalysisConfig {
    pub fn with_cell_size(mut self, cell_size_meters: u32) -> Self {
        self.cell_size_meters = cell_size_meters;
        self
    }

    pub fn get_worker_threads(&self) -> usize {
        self.worker_threads
            .filter(|&n| n > 0)
            .unwrap_or_else(num_cpus::get)
    }

    pub fn validate(&self) -> Result<(), AnalysisError> {
        if !(MIN_CELL_SIZE_METERS..=MAX_CELL_SIZE_METERS).contains(&self.cell_size_meters) {
            return Err(AnalysisError::Config(format!(
                "cell_size_meters must be within [{}, {}], got {}",
                MIN_CELL_SIZE_METERS, MAX_CELL_SIZE_METERS, self.cell_size_meters
            )));
        }
        for (name, value) in [
            ("max_search_radius_meters", self.max_search_radius_meters),
            ("meters_per_degree", self.meters_per_degree),
            ("default_building_height", self.default_building_height),
            ("meters_per_level", self.meters_per_level),
        ] {
            if !value.is_finite() || value <= 0.0 {
                return Err(AnalysisError::Config(format!(
                    "{} must be positive, got {}",
                    name, value
                )));
            }
        }
        self.sun.validate()
    }

    pub fn from_json_str(json: &str) -> Result<Self, AnalysisError> {
        let config: AnalysisConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, AnalysisError> {
        let json = std::fs::read_to_string(path)?;
        let config = Self::from_json_str(&json)?;
        info!("Loaded analysis config from {}", path.display());
        Ok(config)
    }

    /// Loads `path` if given, else the per-user default file, else defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, AnalysisError> {
        if let Some(path) = path {
            return Self::load(path);
        }
        match default_config_path() {
            Some(default_path) if default_path.is_file() => Self::load(&default_path),
            _ => {
                debug!("No config file found, using defaults");
                Ok(Self::default())
            }
        }
    }
}

impl SunSamplingConfig {
    pub fn sample_count(&self) -> usize {
        self.dates.len() * self.hours.len()
    }

    pub fn validate(&self) -> Result<(), AnalysisError> {
        if self.dates.is_empty() || self.hours.is_empty() {
            return Err(AnalysisError::Config(
                "sun sampling needs at least one date and one hour".to_string(),
            ));
        }
        for &(month, day) in &self.dates {
            if chrono::NaiveDate::from_ymd_opt(self.year, month, day).is_none() {
                return Err(AnalysisError::Config(format!(
                    "invalid sample date {}-{:02}-{:02}",
                    self.year, month, day
                )));
            }
        }
        if let Some(&hour) = self.hours.iter().find(|&&h| h > 23) {
            return Err(AnalysisError::Config(format!(
                "sample hour {} is outside 0..=23",
                hour
            )));
        }
        if let Some(offset) = self.utc_offset_hours {
            if !(-14..=14).contains(&offset) {
                return Err(AnalysisError::Config(format!(
                    "utc_offset_hours {} is outside -14..=14",
                    offset
                )));
            }
        }
        if let Some(name) = &self.timezone {
            name.parse::<chrono_tz::Tz>()
                .map_err(|e| AnalysisError::Config(format!("unknown timezone {}: {}", name, e)))?;
        }
        Ok(())
    }
}

pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("solar-grid").join("config.json"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_valid() {
        let config = AnalysisConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.cell_size_meters, 10);
        assert_eq!(config.sun.sample_count(), 6);
    }

    #[test]
    fn cell_size_range_is_enforced() {
        assert!(AnalysisConfig::default().with_cell_size(5).validate().is_ok());
        assert!(AnalysisConfig::default().with_cell_size(20).validate().is_ok());
        assert!(AnalysisConfig::default().with_cell_size(4).validate().is_err());
        assert!(AnalysisConfig::default().with_cell_size(21).validate().is_err());
    }

    #[test]
    fn partial_json_fills_defaults() {
        let config =
            AnalysisConfig::from_json_str(r#"{"cell_size_meters": 15, "sun": {"hours": [10, 14]}}"#)
                .unwrap();
        assert_eq!(config.cell_size_meters, 15);
        assert_eq!(config.sun.hours, vec![10, 14]);
        assert_eq!(config.sun.dates, vec![(6, 21), (12, 21)]);
        assert_eq!(config.max_search_radius_meters, 200.0);
    }

    #[test]
    fn rejects_bad_dates_and_zones() {
        let mut config = AnalysisConfig::default();
        config.sun.dates = vec![(2, 30)];
        assert!(config.validate().is_err());

        let mut config = AnalysisConfig::default();
        config.sun.timezone = Some("Mars/Olympus_Mons".to_string());
        assert!(config.validate().is_err());

        let mut config = AnalysisConfig::default();
        config.sun.timezone = Some("Europe/Berlin".to_string());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn loads_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"cell_size_meters": 8, "worker_threads": 2}}"#).unwrap();
        let config = AnalysisConfig::load_or_default(Some(file.path())).unwrap();
        assert_eq!(config.cell_size_meters, 8);
        assert_eq!(config.get_worker_threads(), 2);
    }

    #[test]
    fn invalid_file_contents_are_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"cell_size_meters": 50}}"#).unwrap();
        assert!(matches!(
            AnalysisConfig::load(file.path()),
            Err(AnalysisError::Config(_))
        ));
    }
}
