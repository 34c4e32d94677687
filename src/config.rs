use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::data::rules::QualityRules;
use crate::plot::{KielPlotOptions, PlotStyle};

pub const DR17_ALLSTAR_LITE_URL: &str = "https://data.sdss.org/sas/dr17/apogee/spectro/aspcap/dr17/synspec_rev1/allStarLite-dr17-synspec_rev1.fits";

const CLEANED_FILE: &str = "apogee_cleaned.parquet";

/// Everything the `prepare` and `plot` commands need, loadable from JSON.
///
/// Missing keys fall back to the APOGEE DR17 defaults, so a config file
/// only has to name what it changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub url: String,
    pub data_dir: PathBuf,
    pub catalog_file: String,
    /// FITS extension holding the catalog table.
    pub hdu: usize,
    /// Cleaned catalog; `<data_dir>/apogee_cleaned.parquet` when unset.
    pub output: Option<PathBuf>,
    pub rules: QualityRules,
    pub plot: KielPlotOptions,
    pub style: PlotStyle,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            url: DR17_ALLSTAR_LITE_URL.to_string(),
            data_dir: PathBuf::from("data"),
            catalog_file: "allStarLite-dr17-synspec_rev1.fits".to_string(),
            hdu: 1,
            output: None,
            rules: QualityRules::default(),
            plot: KielPlotOptions::default(),
            style: PlotStyle::default(),
        }
    }
}

impl PipelineConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text =
            fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        let config = serde_json::from_str(&text)
            .with_context(|| format!("parsing config {}", path.display()))?;
        log::debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Where the downloaded catalog lives.
    pub fn catalog_path(&self) -> PathBuf {
        self.data_dir.join(&self.catalog_file)
    }

    /// Where the cleaned catalog is written.
    pub fn output_path(&self) -> PathBuf {
        self.output
            .clone()
            .unwrap_or_else(|| self.data_dir.join(CLEANED_FILE))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::rules::EmptyResultPolicy;

    #[test]
    fn defaults_point_at_dr17() {
        let config = PipelineConfig::default();
        assert_eq!(
            config.catalog_path(),
            Path::new("data/allStarLite-dr17-synspec_rev1.fits")
        );
        assert_eq!(config.output_path(), Path::new("data/apogee_cleaned.parquet"));
        assert!(config.url.ends_with(&config.catalog_file));

        let moved = PipelineConfig {
            data_dir: PathBuf::from("/scratch/apogee"),
            ..PipelineConfig::default()
        };
        assert_eq!(
            moved.output_path(),
            Path::new("/scratch/apogee/apogee_cleaned.parquet")
        );
        assert_eq!(config.rules, QualityRules::apogee_dr17());
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(
            &path,
            r#"{
                "output": "out/clean.parquet",
                "rules": { "on_empty": "error" },
                "plot": { "scatter": true }
            }"#,
        )
        .unwrap();

        let config = PipelineConfig::load(&path).unwrap();
        assert_eq!(config.output_path(), Path::new("out/clean.parquet"));
        assert_eq!(config.rules.on_empty, EmptyResultPolicy::Error);
        assert_eq!(config.rules.quantities.len(), 3);
        assert!(config.plot.scatter);
        assert_eq!(config.hdu, 1);
    }

    #[test]
    fn malformed_json_names_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        fs::write(&path, "{ not json").unwrap();

        let err = PipelineConfig::load(&path).unwrap_err();
        assert!(err.to_string().contains("bad.json"));
    }
}
