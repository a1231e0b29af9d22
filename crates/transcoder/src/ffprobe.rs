use std::collections::HashMap;
use std::path::{Path, PathBuf};
use anyhow::{Context, Result};
use async_trait::async_trait;
use log::debug;
use serde::Deserialize;
use tokio::process::Command;

/// Tag matroska muxers write with the byte count of each track
const BYTE_SIZE_TAG: &str = "NUMBER_OF_BYTES";

/// The part of ffprobe's JSON output this crate reads
#[derive(Debug, Clone, Deserialize)]
pub struct FFProbeData {
    #[serde(default)]
    pub streams: Vec<FFProbeStream>,
}

/// Stream-level metadata from ffprobe
#[derive(Debug, Clone, Deserialize)]
pub struct FFProbeStream {
    pub index: i32,
    pub codec_type: Option<String>,
    pub codec_name: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub tags: Option<HashMap<String, String>>,
}

impl FFProbeStream {
    /// Byte count of the stream as recorded by the muxer
    ///
    /// mkvmerge writes `NUMBER_OF_BYTES`; ffmpeg's matroska muxer may write a
    /// language-suffixed variant such as `NUMBER_OF_BYTES-eng`.
    pub fn byte_size(&self) -> Option<u64> {
        let tags = self.tags.as_ref()?;
        if let Some(v) = tags.get(BYTE_SIZE_TAG) {
            return v.trim().parse().ok();
        }
        tags.iter()
            .filter(|(k, _)| k.starts_with(BYTE_SIZE_TAG))
            .find_map(|(_, v)| v.trim().parse().ok())
    }
}

/// Kind of a stream the pipeline cares about
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Video,
    Audio,
    Subtitle,
}

/// A classified stream of a media file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamDescriptor {
    pub index: i32,
    pub kind: StreamKind,
    pub codec_name: String,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub byte_size: Option<u64>,
}

impl StreamDescriptor {
    /// Classify an ffprobe stream; attachments and data streams yield None
    pub fn from_probe(stream: &FFProbeStream) -> Option<Self> {
        let kind = match stream.codec_type.as_deref() {
            Some("video") => StreamKind::Video,
            Some("audio") => StreamKind::Audio,
            Some("subtitle") => StreamKind::Subtitle,
            _ => return None,
        };
        let (width, height) = match kind {
            StreamKind::Video => (stream.width, stream.height),
            StreamKind::Audio | StreamKind::Subtitle => (None, None),
        };
        Some(Self {
            index: stream.index,
            kind,
            codec_name: stream.codec_name.clone().unwrap_or_default(),
            width,
            height,
            byte_size: stream.byte_size(),
        })
    }
}

/// Video, audio and subtitle streams of one file, in container order
#[derive(Debug, Clone, Default)]
pub struct InspectedStreams {
    pub video: Vec<StreamDescriptor>,
    pub audio: Vec<StreamDescriptor>,
    pub subtitle: Vec<StreamDescriptor>,
}

impl InspectedStreams {
    pub fn from_probe(data: &FFProbeData) -> Self {
        let mut inspected = Self::default();
        for desc in data.streams.iter().filter_map(StreamDescriptor::from_probe) {
            match desc.kind {
                StreamKind::Video => inspected.video.push(desc),
                StreamKind::Audio => inspected.audio.push(desc),
                StreamKind::Subtitle => inspected.subtitle.push(desc),
            }
        }
        inspected
    }
}

/// Source of stream metadata for a media file
#[async_trait]
pub trait Prober: Send + Sync {
    async fn probe(&self, path: &Path) -> Result<FFProbeData>;
}

/// Probe a file and group its streams by kind
pub async fn inspect(prober: &dyn Prober, path: &Path) -> Result<InspectedStreams> {
    let data = prober.probe(path).await?;
    let inspected = InspectedStreams::from_probe(&data);
    debug!(
        "{}: {} stream(s), {} video, {} audio, {} subtitle",
        path.display(),
        data.streams.len(),
        inspected.video.len(),
        inspected.audio.len(),
        inspected.subtitle.len()
    );
    Ok(inspected)
}

/// Runs the ffprobe binary and parses its JSON output
#[derive(Debug, Clone)]
pub struct FfprobeCli {
    pub ffprobe_bin: PathBuf,
}

impl FfprobeCli {
    pub fn new(ffprobe_bin: impl Into<PathBuf>) -> Self {
        Self {
            ffprobe_bin: ffprobe_bin.into(),
        }
    }
}

#[async_trait]
impl Prober for FfprobeCli {
    async fn probe(&self, file_path: &Path) -> Result<FFProbeData> {
        if !file_path.exists() {
            anyhow::bail!("File does not exist: {}", file_path.display());
        }

        let output = Command::new(&self.ffprobe_bin)
            .arg("-v")
            .arg("error")
            .arg("-print_format")
            .arg("json")
            .arg("-show_streams")
            .arg(file_path)
            .output()
            .await
            .with_context(|| format!("Failed to execute ffprobe for: {}", file_path.display()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!(
                "ffprobe failed (exit code {}) for {}: {}",
                output.status.code().unwrap_or(-1),
                file_path.display(),
                stderr.trim()
            );
        }

        let json_str = String::from_utf8(output.stdout)
            .context("ffprobe output is not valid UTF-8")?;

        serde_json::from_str(&json_str)
            .with_context(|| format!("Failed to parse ffprobe JSON for: {}", file_path.display()))
    }
}
