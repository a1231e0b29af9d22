use std::path::{Path, PathBuf};
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

/// Presets accepted by libx265
pub const X265_PRESETS: &[&str] = &[
    "ultrafast", "superfast", "veryfast", "faster", "fast",
    "medium", "slow", "slower", "veryslow", "placebo",
];

/// CRF value per resolution bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CrfTable {
    /// Up to 640 pixels wide (480p/576p)
    pub sd: u8,
    /// Up to 1280 pixels wide (720p)
    pub hd: u8,
    /// Up to 1920 pixels wide (1080p)
    pub full_hd: u8,
    /// Up to 3840 pixels wide (2160p)
    pub uhd: u8,
}

impl Default for CrfTable {
    fn default() -> Self {
        Self {
            sd: 19,
            hd: 20,
            full_hd: 21,
            uhd: 23,
        }
    }
}

/// Encoder tuning that is the same for every file in a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Tuning {
    /// x265 rc-lookahead, 0-250
    pub rc_lookahead: u16,
    /// x265 aq-mode, 0-4
    pub aq_mode: u8,
    /// x265 speed preset
    pub preset: String,
}

impl Default for Tuning {
    fn default() -> Self {
        Self {
            rc_lookahead: 20,
            aq_mode: 2,
            preset: "medium".to_string(),
        }
    }
}

/// Locations of the external tools
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolPaths {
    pub ffmpeg: PathBuf,
    pub ffprobe: PathBuf,
    pub mkvmerge: PathBuf,
}

impl Default for ToolPaths {
    fn default() -> Self {
        Self {
            ffmpeg: PathBuf::from("ffmpeg"),
            ffprobe: PathBuf::from("ffprobe"),
            mkvmerge: PathBuf::from("mkvmerge"),
        }
    }
}

/// Run-wide settings, built once at startup and never mutated
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// File extensions to consider, each with a leading dot
    #[serde(deserialize_with = "deserialize_extensions")]
    pub extensions: Vec<String>,
    pub crf: CrfTable,
    pub tuning: Tuning,
    /// Smallest acceptable new/old video size, in percent
    pub min_percent: u32,
    /// Largest acceptable new/old video size, in percent
    pub max_percent: u32,
    /// Total encode attempts per file (retries + 1)
    pub retry_budget: u32,
    /// Re-encode audio to E-AC-3 when a DTS stream is present
    pub convert_dts: bool,
    pub tools: ToolPaths,
}

const DEFAULT_EXTENSIONS: &str = "mkv,mp4,mov,m4v,mpg,mpeg,avi,flv,webm,wmv,vob,evo,iso,m2ts,ts";

impl Default for RunConfig {
    fn default() -> Self {
        Self::default_config()
    }
}

impl RunConfig {
    pub fn default_config() -> Self {
        Self {
            extensions: parse_extensions(DEFAULT_EXTENSIONS),
            crf: CrfTable::default(),
            tuning: Tuning::default(),
            min_percent: 10,
            max_percent: 100,
            retry_budget: 2,
            convert_dts: true,
            tools: ToolPaths::default(),
        }
    }

    /// Load configuration from a file, or return defaults if path is None or file doesn't exist
    pub fn load_config(path: Option<&Path>) -> Result<Self> {
        let mut config = Self::default_config();

        if let Some(config_path) = path {
            if config_path.exists() {
                let content = std::fs::read_to_string(config_path)
                    .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

                if config_path.extension().and_then(|s| s.to_str()) == Some("toml") {
                    config = toml::from_str(&content)
                        .with_context(|| format!("Failed to parse TOML config: {}", config_path.display()))?;
                } else {
                    config = serde_json::from_str(&content)
                        .with_context(|| format!("Failed to parse JSON config: {}", config_path.display()))?;
                }
            }
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject values the encoder or the size gate cannot work with
    pub fn validate(&self) -> Result<()> {
        for (bucket, crf) in [
            ("sd", self.crf.sd),
            ("hd", self.crf.hd),
            ("full_hd", self.crf.full_hd),
            ("uhd", self.crf.uhd),
        ] {
            if crf > 51 {
                bail!("crf.{} must be within 0-51, got {}", bucket, crf);
            }
        }
        if self.tuning.rc_lookahead > 250 {
            bail!("tuning.rc_lookahead must be within 0-250, got {}", self.tuning.rc_lookahead);
        }
        if self.tuning.aq_mode > 4 {
            bail!("tuning.aq_mode must be within 0-4, got {}", self.tuning.aq_mode);
        }
        if !X265_PRESETS.contains(&self.tuning.preset.as_str()) {
            bail!("tuning.preset '{}' is not an x265 preset", self.tuning.preset);
        }
        if self.min_percent > self.max_percent {
            bail!(
                "min_percent ({}) is larger than max_percent ({})",
                self.min_percent,
                self.max_percent
            );
        }
        if self.extensions.is_empty() {
            bail!("extensions must list at least one file extension");
        }
        Ok(())
    }

    /// Whether a path carries one of the configured extensions
    pub fn matches_extension(&self, path: &Path) -> bool {
        let Some(ext) = path.extension().and_then(|s| s.to_str()) else {
            return false;
        };
        let dotted = format!(".{}", ext.to_lowercase());
        self.extensions.iter().any(|e| *e == dotted)
    }
}

/// Split a comma separated list into lowercase extensions with a leading dot
pub fn parse_extensions(list: &str) -> Vec<String> {
    list.split(',')
        .map(str::trim)
        .filter(|ext| !ext.is_empty())
        .map(normalize_extension)
        .collect()
}

fn normalize_extension(ext: &str) -> String {
    let ext = ext.to_lowercase();
    if ext.starts_with('.') {
        ext
    } else {
        format!(".{}", ext)
    }
}

fn deserialize_extensions<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Extensions {
        List(Vec<String>),
        Csv(String),
    }

    Ok(match Extensions::deserialize(deserializer)? {
        Extensions::List(list) => list
            .iter()
            .map(|e| e.trim())
            .filter(|e| !e.is_empty())
            .map(normalize_extension)
            .collect(),
        Extensions::Csv(csv) => parse_extensions(&csv),
    })
}
