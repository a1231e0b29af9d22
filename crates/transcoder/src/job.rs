use std::path::PathBuf;
use uuid::Uuid;
use crate::ffprobe::{InspectedStreams, StreamDescriptor};

/// Per-file state carried through the pipeline
#[derive(Debug, Clone)]
pub struct FileJob {
    /// Short identifier used to correlate log lines
    pub id: String,
    pub source_path: PathBuf,
    /// Transcode output; set when the first encode attempt starts
    pub converted_path: Option<PathBuf>,
    pub attempts: u32,
    pub video_streams: Vec<StreamDescriptor>,
    pub audio_streams: Vec<StreamDescriptor>,
    pub subtitle_streams: Vec<StreamDescriptor>,
    /// Set once the retry budget is exhausted
    pub failed: bool,
}

impl FileJob {
    /// Create a job for a scanned file together with its inspected streams
    pub fn new(source_path: impl Into<PathBuf>, streams: InspectedStreams) -> Self {
        let uuid = Uuid::new_v4().simple().to_string();
        Self {
            id: uuid[..8].to_string(),
            source_path: source_path.into(),
            converted_path: None,
            attempts: 0,
            video_streams: streams.video,
            audio_streams: streams.audio,
            subtitle_streams: streams.subtitle,
            failed: false,
        }
    }

    /// The single video stream of an eligible job
    pub fn video_stream(&self) -> Option<&StreamDescriptor> {
        match self.video_streams.as_slice() {
            [only] => Some(only),
            _ => None,
        }
    }

    /// File name for log lines
    pub fn display_name(&self) -> String {
        self.source_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.source_path.display().to_string())
    }
}
