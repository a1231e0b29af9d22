//! Running as an NZBGet post-processing script.
//!
//! NZBGet passes the download directory and the script options through
//! environment variables and reads the script's exit code as its status.

use std::path::PathBuf;
use std::str::FromStr;
use anyhow::{bail, Context, Result};
use crate::config::{parse_extensions, RunConfig};

pub const POSTPROCESS_PARCHECK: i32 = 92;
pub const POSTPROCESS_SUCCESS: i32 = 93;
pub const POSTPROCESS_ERROR: i32 = 94;
pub const POSTPROCESS_NONE: i32 = 95;

/// Oldest NZBGet release with the exit-code protocol above
const MIN_MAJOR_VERSION: u32 = 11;

/// Directory and settings handed over by NZBGet
#[derive(Debug, Clone)]
pub struct NzbgetContext {
    pub directory: PathBuf,
    pub config: RunConfig,
}

/// Whether the process was started by NZBGet
pub fn is_nzbget<F>(env: F) -> bool
where
    F: Fn(&str) -> Option<String>,
{
    env("NZBOP_SCRIPTDIR").is_some()
}

/// Read the NZBGet environment, overlaying script options onto `base`
///
/// Options NZBGet did not pass keep the value from `base`.
pub fn from_env<F>(env: F, base: RunConfig) -> Result<NzbgetContext>
where
    F: Fn(&str) -> Option<String>,
{
    let version = env("NZBOP_VERSION").context("NZBOP_VERSION is not set")?;
    let major = major_version(&version)
        .with_context(|| format!("Unrecognised NZBGet version: {}", version))?;
    if major < MIN_MAJOR_VERSION {
        bail!("NZBGet {} is too old, 11.0 or later is required", version);
    }

    let directory = env("NZBPP_DIRECTORY")
        .map(PathBuf::from)
        .context("NZBPP_DIRECTORY is not set")?;

    let mut config = base;
    if let Some(list) = env("NZBPO_EXTENSIONS_TO_CHECK") {
        config.extensions = parse_extensions(&list);
    }
    overlay(&env, "NZBPO_SDCRF", &mut config.crf.sd)?;
    overlay(&env, "NZBPO_HDCRF", &mut config.crf.hd)?;
    overlay(&env, "NZBPO_FULLHDCRF", &mut config.crf.full_hd)?;
    overlay(&env, "NZBPO_UHDCRF", &mut config.crf.uhd)?;
    overlay(&env, "NZBPO_RCLOOKAHEAD", &mut config.tuning.rc_lookahead)?;
    overlay(&env, "NZBPO_AQMODE", &mut config.tuning.aq_mode)?;
    if let Some(preset) = env("NZBPO_FFMPEGPRESET") {
        config.tuning.preset = preset.trim().to_lowercase();
    }
    overlay(&env, "NZBPO_MINPERCENT", &mut config.min_percent)?;
    overlay(&env, "NZBPO_MAXPERCENT", &mut config.max_percent)?;

    if let Some(raw) = env("NZBPO_RETRYFAILURE") {
        let retries: u32 = parse_option("NZBPO_RETRYFAILURE", &raw)?;
        config.retry_budget = retries.saturating_add(1);
    }

    if let Some(flag) = env("NZBPO_CONVERTDTS") {
        config.convert_dts = flag.trim().eq_ignore_ascii_case("true");
    }

    config.validate().context("Invalid NZBGet script options")?;
    Ok(NzbgetContext { directory, config })
}

fn overlay<F, T>(env: &F, key: &str, target: &mut T) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    if let Some(raw) = env(key) {
        *target = parse_option(key, &raw)?;
    }
    Ok(())
}

fn parse_option<T>(key: &str, raw: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    raw.trim()
        .parse()
        .with_context(|| format!("{} has an invalid value: '{}'", key, raw))
}

/// Leading number of a version string such as "21.1" or "11.0-testing-r1234"
fn major_version(version: &str) -> Option<u32> {
    let digits: String = version
        .trim()
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    digits.parse().ok()
}
