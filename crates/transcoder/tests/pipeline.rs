use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{bail, Result};
use async_trait::async_trait;
use filetime::FileTime;
use serde_json::json;
use transcoder::encoder::EncodeOptions;
use transcoder::pipeline::{run, RunStatus, Toolchain};
use transcoder::{Encoder, FFProbeData, Prober, Remuxer, RunConfig, RunError};

/// Answers with canned streams for source files and derives the video size of
/// anything else from its length on disk, as mkvmerge's statistics tags would
#[derive(Default)]
struct FakeProber {
    sources: HashMap<PathBuf, serde_json::Value>,
}

impl FakeProber {
    fn with(mut self, path: &Path, streams: serde_json::Value) -> Self {
        self.sources.insert(path.to_path_buf(), json!({ "streams": streams }));
        self
    }
}

#[async_trait]
impl Prober for FakeProber {
    async fn probe(&self, path: &Path) -> Result<FFProbeData> {
        if let Some(data) = self.sources.get(path) {
            return Ok(serde_json::from_value(data.clone())?);
        }
        if !path.exists() || path.extension().and_then(|e| e.to_str()) != Some("mkv") {
            bail!("Invalid data found when processing input");
        }
        let size = fs::metadata(path)?.len();
        Ok(serde_json::from_value(json!({
            "streams": [
                video("hevc", 1920, size),
                audio("aac"),
            ]
        }))?)
    }
}

/// Writes `output_size` bytes, or a partial file and an error when `fail` is set
#[derive(Clone)]
struct FakeEncoder {
    output_size: usize,
    fail: bool,
    calls: Arc<AtomicU32>,
    options: Arc<Mutex<Vec<EncodeOptions>>>,
}

impl FakeEncoder {
    fn producing(output_size: usize) -> Self {
        Self {
            output_size,
            fail: false,
            calls: Arc::new(AtomicU32::new(0)),
            options: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn broken() -> Self {
        Self {
            fail: true,
            ..Self::producing(0)
        }
    }
}

#[async_trait]
impl Encoder for FakeEncoder {
    async fn encode(&self, _input: &Path, output: &Path, options: &EncodeOptions) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.options.lock().unwrap().push(options.clone());
        if self.fail {
            fs::write(output, b"truncated")?;
            bail!("ffmpeg exit code 1: Conversion failed!");
        }
        fs::write(output, vec![b'x'; self.output_size])?;
        Ok(())
    }
}

struct CopyRemuxer;

#[async_trait]
impl Remuxer for CopyRemuxer {
    async fn remux(&self, input: &Path, output: &Path) -> Result<()> {
        fs::copy(input, output)?;
        Ok(())
    }
}

struct FailingRemuxer;

#[async_trait]
impl Remuxer for FailingRemuxer {
    async fn remux(&self, _input: &Path, _output: &Path) -> Result<()> {
        bail!("mkvmerge exit code 2")
    }
}

fn video(codec: &str, width: u32, bytes: u64) -> serde_json::Value {
    json!({
        "index": 0,
        "codec_type": "video",
        "codec_name": codec,
        "width": width,
        "height": width * 9 / 16,
        "tags": { "NUMBER_OF_BYTES": bytes.to_string() }
    })
}

fn audio(codec: &str) -> serde_json::Value {
    json!({ "index": 1, "codec_type": "audio", "codec_name": codec })
}

fn subtitle(index: u32, codec: &str) -> serde_json::Value {
    json!({ "index": index, "codec_type": "subtitle", "codec_name": codec })
}

fn toolchain(prober: FakeProber, encoder: &FakeEncoder) -> Toolchain {
    Toolchain {
        prober: Box::new(prober),
        encoder: Box::new(encoder.clone()),
        remuxer: Box::new(CopyRemuxer),
    }
}

fn file_names(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

fn source(dir: &Path, name: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, b"original video payload").unwrap();
    path
}

#[tokio::test]
async fn replaces_original_and_keeps_timestamps() {
    let dir = tempfile::tempdir().unwrap();
    let movie = source(dir.path(), "movie.avi");
    let mtime = FileTime::from_unix_time(1_400_000_000, 0);
    let atime = FileTime::from_unix_time(1_450_000_000, 0);
    filetime::set_file_times(&movie, atime, mtime).unwrap();

    let prober = FakeProber::default().with(&movie, json!([video("h264", 1920, 1000), audio("ac3")]));
    let encoder = FakeEncoder::producing(500);
    let cfg = RunConfig::default_config();

    let summary = run(dir.path(), &cfg, &toolchain(prober, &encoder)).await.unwrap();

    assert_eq!(summary.status(), RunStatus::Success);
    assert_eq!(summary.replaced, 1);
    assert_eq!(file_names(dir.path()), vec!["movie.avi"]);

    let meta = fs::metadata(&movie).unwrap();
    assert_eq!(FileTime::from_last_modification_time(&meta), mtime);
    assert_eq!(FileTime::from_last_access_time(&meta), atime);
    assert_eq!(fs::read(&movie).unwrap(), vec![b'x'; 500]);

    let options = encoder.options.lock().unwrap();
    assert_eq!(options.len(), 1);
    assert_eq!(options[0].crf, 21);
    assert_eq!(options[0].video_codec, "libx265");
    assert_eq!(options[0].audio_codec, None);
}

#[tokio::test]
async fn already_converted_tree_is_left_alone() {
    let dir = tempfile::tempdir().unwrap();
    let a = source(dir.path(), "a.mkv");
    let b = source(dir.path(), "b.mp4");
    let prober = FakeProber::default()
        .with(&a, json!([video("hevc", 1920, 1000), audio("aac")]))
        .with(&b, json!([video("hevc", 3840, 1000)]));
    let encoder = FakeEncoder::producing(500);

    let summary = run(dir.path(), &RunConfig::default_config(), &toolchain(prober, &encoder))
        .await
        .unwrap();

    assert_eq!(summary.status(), RunStatus::NothingToDo);
    assert_eq!(summary.skipped, 2);
    assert_eq!(encoder.calls.load(Ordering::SeqCst), 0);
    assert_eq!(file_names(dir.path()), vec!["a.mkv", "b.mp4"]);
}

#[tokio::test]
async fn wrong_video_stream_count_is_skipped() {
    let dir = tempfile::tempdir().unwrap();
    let audio_only = source(dir.path(), "album.mkv");
    let two_videos = source(dir.path(), "angles.mkv");
    let prober = FakeProber::default()
        .with(&audio_only, json!([audio("flac"), audio("dts")]))
        .with(&two_videos, json!([video("h264", 1920, 10), video("h264", 1920, 10), audio("aac")]));
    let encoder = FakeEncoder::producing(5);

    let summary = run(dir.path(), &RunConfig::default_config(), &toolchain(prober, &encoder))
        .await
        .unwrap();

    assert_eq!(summary.status(), RunStatus::NothingToDo);
    assert_eq!(encoder.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn unreadable_files_and_other_extensions_are_skipped() {
    let dir = tempfile::tempdir().unwrap();
    source(dir.path(), "broken.avi");
    source(dir.path(), "cover.jpg");
    let encoder = FakeEncoder::producing(5);

    let summary = run(dir.path(), &RunConfig::default_config(), &toolchain(FakeProber::default(), &encoder))
        .await
        .unwrap();

    assert_eq!(summary.scanned, 1);
    assert_eq!(summary.skipped, 1);
    assert_eq!(summary.status(), RunStatus::NothingToDo);
}

#[tokio::test]
async fn persistent_encoder_failure_uses_whole_budget() {
    let dir = tempfile::tempdir().unwrap();
    let movie = source(dir.path(), "movie.mp4");
    let prober = FakeProber::default().with(&movie, json!([video("h264", 1280, 1000)]));
    let encoder = FakeEncoder::broken();
    let cfg = RunConfig {
        retry_budget: 3,
        ..RunConfig::default_config()
    };

    let summary = run(dir.path(), &cfg, &toolchain(prober, &encoder)).await.unwrap();

    assert_eq!(encoder.calls.load(Ordering::SeqCst), 3);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.status(), RunStatus::Success);
    assert_eq!(file_names(dir.path()), vec!["movie.mp4"]);
    assert_eq!(fs::read(&movie).unwrap(), b"original video payload");
}

#[tokio::test]
async fn oversized_transcode_is_discarded() {
    let dir = tempfile::tempdir().unwrap();
    let movie = source(dir.path(), "movie.mkv");
    let prober = FakeProber::default().with(&movie, json!([video("h264", 1920, 1000)]));
    let encoder = FakeEncoder::producing(1001);

    let summary = run(dir.path(), &RunConfig::default_config(), &toolchain(prober, &encoder))
        .await
        .unwrap();

    assert_eq!(summary.rejected, 1);
    assert_eq!(file_names(dir.path()), vec!["movie.mkv"]);
    assert_eq!(fs::read(&movie).unwrap(), b"original video payload");
}

#[tokio::test]
async fn undersized_transcode_is_discarded() {
    let dir = tempfile::tempdir().unwrap();
    let movie = source(dir.path(), "movie.mkv");
    let prober = FakeProber::default().with(&movie, json!([video("h264", 1920, 1000)]));
    let encoder = FakeEncoder::producing(99);

    let summary = run(dir.path(), &RunConfig::default_config(), &toolchain(prober, &encoder))
        .await
        .unwrap();

    assert_eq!(summary.rejected, 1);
    assert_eq!(fs::read(&movie).unwrap(), b"original video payload");
}

#[tokio::test]
async fn transcode_exactly_at_thresholds_is_kept() {
    for size in [100, 1000] {
        let dir = tempfile::tempdir().unwrap();
        let movie = source(dir.path(), "movie.mkv");
        let prober = FakeProber::default().with(&movie, json!([video("h264", 1920, 1000)]));
        let encoder = FakeEncoder::producing(size);

        let summary = run(dir.path(), &RunConfig::default_config(), &toolchain(prober, &encoder))
            .await
            .unwrap();

        assert_eq!(summary.replaced, 1, "size {}", size);
        assert_eq!(fs::read(&movie).unwrap().len(), size);
    }
}

#[tokio::test]
async fn existing_output_name_is_not_overwritten() {
    let dir = tempfile::tempdir().unwrap();
    let movie = source(dir.path(), "movie.mkv");
    fs::write(dir.path().join("movie(1).mkv"), b"someone else's file").unwrap();
    let cfg = RunConfig::default_config();
    // the unrelated file is scanned too, and skipped as already converted
    let prober = FakeProber::default()
        .with(&movie, json!([video("h264", 640, 1000)]))
        .with(&dir.path().join("movie(1).mkv"), json!([video("hevc", 640, 19)]));
    let encoder = FakeEncoder::producing(400);

    let summary = run(dir.path(), &cfg, &toolchain(prober, &encoder)).await.unwrap();

    assert_eq!(summary.replaced, 1);
    assert_eq!(fs::read(dir.path().join("movie(1).mkv")).unwrap(), b"someone else's file");
    assert_eq!(fs::read(&movie).unwrap(), vec![b'x'; 400]);
    assert_eq!(file_names(dir.path()), vec!["movie(1).mkv", "movie.mkv"]);
    assert_eq!(encoder.options.lock().unwrap()[0].crf, 19);
}

#[tokio::test]
async fn dts_audio_is_converted() {
    let dir = tempfile::tempdir().unwrap();
    let movie = source(dir.path(), "movie.mkv");
    let prober = FakeProber::default()
        .with(&movie, json!([video("h264", 3840, 1000), audio("dts"), audio("ac3")]));
    let encoder = FakeEncoder::producing(500);

    run(dir.path(), &RunConfig::default_config(), &toolchain(prober, &encoder))
        .await
        .unwrap();

    let options = encoder.options.lock().unwrap();
    assert_eq!(options[0].crf, 23);
    assert_eq!(options[0].audio_codec.as_deref(), Some("eac3"));
    assert_eq!(options[0].audio_bitrate.as_deref(), Some("640k"));
}

#[tokio::test]
async fn resolution_above_uhd_aborts_run() {
    let dir = tempfile::tempdir().unwrap();
    let movie = source(dir.path(), "8k.mkv");
    let prober = FakeProber::default().with(&movie, json!([video("h264", 7680, 1000)]));
    let encoder = FakeEncoder::producing(500);

    let err = run(dir.path(), &RunConfig::default_config(), &toolchain(prober, &encoder))
        .await
        .unwrap_err();

    assert!(matches!(err, RunError::UnsupportedResolution { width: 7680, .. }));
    assert_eq!(encoder.calls.load(Ordering::SeqCst), 0);
    assert_eq!(file_names(dir.path()), vec!["8k.mkv"]);
}

#[tokio::test]
async fn missing_directory_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("gone");
    let encoder = FakeEncoder::producing(1);

    let err = run(&missing, &RunConfig::default_config(), &toolchain(FakeProber::default(), &encoder))
        .await
        .unwrap_err();

    assert!(matches!(err, RunError::DestinationMissing(p) if p == missing));
}

#[tokio::test]
async fn failed_remux_aborts_without_leaving_transcode() {
    let dir = tempfile::tempdir().unwrap();
    let movie = source(dir.path(), "movie.mkv");
    let prober = FakeProber::default().with(&movie, json!([video("h264", 1920, 1000)]));
    let encoder = FakeEncoder::producing(500);
    let tools = Toolchain {
        remuxer: Box::new(FailingRemuxer),
        ..toolchain(prober, &encoder)
    };

    let err = run(dir.path(), &RunConfig::default_config(), &tools).await.unwrap_err();

    assert!(matches!(err, RunError::Commit { .. }));
    assert_eq!(file_names(dir.path()), vec!["movie.mkv"]);
    assert_eq!(fs::read(&movie).unwrap(), b"original video payload");
}

#[tokio::test]
async fn mp4_text_subtitles_are_converted_for_matroska() {
    let dir = tempfile::tempdir().unwrap();
    let movie = source(dir.path(), "movie.mp4");
    let prober = FakeProber::default().with(
        &movie,
        json!([video("h264", 1280, 1000), audio("aac"), subtitle(2, "mov_text")]),
    );
    let encoder = FakeEncoder::producing(500);

    let summary = run(dir.path(), &RunConfig::default_config(), &toolchain(prober, &encoder))
        .await
        .unwrap();

    assert_eq!(summary.replaced, 1);
    let options = encoder.options.lock().unwrap();
    assert_eq!(options[0].subtitle_codecs, vec![(0, "srt".to_string())]);
}
