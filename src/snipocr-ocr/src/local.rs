//! Local recognition by driving the Tesseract engine binary
//!
//! The encoded image is written to the engine's stdin and word-level TSV is
//! read back from stdout, giving per-word confidences.

use crate::adapter::RecognitionBackend;
use crate::aggregate::{ConfidenceReport, RawRecognition};
use crate::error::{OcrError, Result};
use crate::request::{EncodedImage, RecognitionOptions};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

/// TSV level of word rows
const WORD_LEVEL: u32 = 5;

/// Page segmentation mode for a single text line
const PSM_SINGLE_LINE: u8 = 7;

/// Local engine settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalConfig {
    /// Engine binary; resolved through PATH when not absolute
    pub binary: PathBuf,

    /// Page segmentation mode used without a single-line hint
    pub page_segmentation: u8,

    /// OCR engine mode (`--oem`)
    pub engine_mode: u8,
}

impl Default for LocalConfig {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("tesseract"),
            page_segmentation: 6,
            engine_mode: 1,
        }
    }
}

pub struct LocalBackend {
    config: LocalConfig,
}

impl LocalBackend {
    pub fn new(config: LocalConfig) -> Self {
        Self { config }
    }

    /// Check whether the engine binary can be run
    pub fn is_available(&self) -> bool {
        std::process::Command::new(&self.config.binary)
            .arg("--version")
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    fn args(&self, options: &RecognitionOptions) -> Vec<String> {
        let psm = if options.single_line_hint {
            PSM_SINGLE_LINE
        } else {
            self.config.page_segmentation
        };

        let mut args = vec![
            "stdin".to_string(),
            "stdout".to_string(),
            "-l".to_string(),
            options.language.clone(),
            "--oem".to_string(),
            self.config.engine_mode.to_string(),
            "--psm".to_string(),
            psm.to_string(),
        ];
        if let Some(whitelist) = options.charset_whitelist.as_deref().filter(|w| !w.is_empty()) {
            args.push("-c".to_string());
            args.push(format!("tessedit_char_whitelist={}", whitelist));
        }
        args.push("tsv".to_string());
        args
    }
}

impl Default for LocalBackend {
    fn default() -> Self {
        Self::new(LocalConfig::default())
    }
}

#[async_trait]
impl RecognitionBackend for LocalBackend {
    async fn recognize(
        &self,
        image: &EncodedImage,
        options: &RecognitionOptions,
    ) -> Result<RawRecognition> {
        let args = self.args(options);
        debug!("running {:?} {}", self.config.binary, args.join(" "));

        let mut child = Command::new(&self.config.binary)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| OcrError::Backend(format!("failed to spawn {:?}: {}", self.config.binary, e)))?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| OcrError::Backend("failed to capture engine stdin".to_string()))?;
        // The engine may exit before reading all input; its stderr says why
        let written = stdin.write_all(&image.bytes).await;
        drop(stdin);

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| OcrError::Backend(format!("engine did not finish: {}", e)))?;

        let stderr = String::from_utf8_lossy(&output.stderr);
        if let Some(err) = engine_failure(written.err(), output.status.success(), stderr.trim()) {
            return Err(err);
        }

        Ok(parse_tsv(&String::from_utf8_lossy(&output.stdout)))
    }

    fn name(&self) -> &str {
        "local"
    }
}

/// Error for a finished engine run, if any. A failed exit is classified
/// from stderr even when writing the image was cut short.
fn engine_failure(write_error: Option<std::io::Error>, success: bool, stderr: &str) -> Option<OcrError> {
    if !success {
        if let Some(e) = write_error {
            debug!("engine closed stdin early: {}", e);
        }
        return Some(classify_failure(stderr));
    }
    write_error.map(|e| OcrError::Backend(format!("failed to write image to engine: {}", e)))
}

/// Map engine stderr to an error kind; the message is kept verbatim
fn classify_failure(stderr: &str) -> OcrError {
    let unreadable = ["pixReadMem", "Unsupported image type", "cannot be read", "Error in findFileFormat"];
    if unreadable.iter().any(|marker| stderr.contains(marker)) {
        OcrError::UnsupportedImage(stderr.to_string())
    } else if stderr.is_empty() {
        OcrError::Backend("recognition engine exited with an error".to_string())
    } else {
        OcrError::Backend(stderr.to_string())
    }
}

/// Rebuild text and per-word confidences from engine TSV output.
///
/// Columns: level, page, block, paragraph, line, word, left, top, width,
/// height, conf, text. Words of one line are joined by spaces, lines by
/// newlines.
fn parse_tsv(tsv: &str) -> RawRecognition {
    let mut text = String::new();
    let mut confidences = Vec::new();
    let mut current_line: Option<(u32, u32, u32, u32)> = None;

    for row in tsv.lines().skip(1) {
        let cols: Vec<&str> = row.split('\t').collect();
        if cols.len() < 12 {
            continue;
        }
        let level: u32 = cols[0].parse().unwrap_or(0);
        if level != WORD_LEVEL {
            continue;
        }
        let word = cols[11].trim();
        let conf: f64 = cols[10].parse().unwrap_or(-1.0);
        if word.is_empty() || conf < 0.0 {
            continue;
        }

        let key = (
            cols[1].parse().unwrap_or(0),
            cols[2].parse().unwrap_or(0),
            cols[3].parse().unwrap_or(0),
            cols[4].parse().unwrap_or(0),
        );
        match current_line {
            Some(line) if line == key => text.push(' '),
            Some(_) => text.push('\n'),
            None => {}
        }
        current_line = Some(key);

        text.push_str(word);
        confidences.push(conf);
    }

    RawRecognition {
        text,
        confidence: ConfidenceReport::PerToken(confidences),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TSV: &str = "level\tpage_num\tblock_num\tpar_num\tline_num\tword_num\tleft\ttop\twidth\theight\tconf\ttext
1\t1\t0\t0\t0\t0\t0\t0\t200\t60\t-1\t
2\t1\t1\t0\t0\t0\t4\t4\t190\t50\t-1\t
4\t1\t1\t1\t1\t0\t4\t4\t190\t20\t-1\t
5\t1\t1\t1\t1\t1\t4\t4\t60\t20\t96.5\tHello
5\t1\t1\t1\t1\t2\t70\t4\t60\t20\t91.5\tworld
4\t1\t1\t1\t2\t0\t4\t30\t100\t20\t-1\t
5\t1\t1\t1\t2\t1\t4\t30\t100\t20\t80\tagain
5\t1\t1\t1\t2\t2\t110\t30\t5\t20\t95\t ";

    #[test]
    fn test_parse_tsv_rebuilds_lines() {
        let raw = parse_tsv(TSV);
        assert_eq!(raw.text, "Hello world\nagain");
        assert_eq!(raw.confidence, ConfidenceReport::PerToken(vec![96.5, 91.5, 80.0]));
    }

    #[test]
    fn test_parse_tsv_empty_output() {
        let raw = parse_tsv("level\tpage_num\n");
        assert_eq!(raw.text, "");
        assert_eq!(raw.confidence.resolve(), 0.0);
    }

    #[test]
    fn test_args_single_line_and_whitelist() {
        let backend = LocalBackend::default();
        let options = RecognitionOptions {
            language: "eng".to_string(),
            charset_whitelist: Some("ABC123".to_string()),
            single_line_hint: true,
            collapse_whitespace: true,
        };

        let args = backend.args(&options);
        assert_eq!(&args[..4], ["stdin", "stdout", "-l", "eng"]);
        assert!(args.windows(2).any(|w| w == ["--psm", "7"]));
        assert!(args.contains(&"tessedit_char_whitelist=ABC123".to_string()));
        assert_eq!(args.last().map(String::as_str), Some("tsv"));
    }

    #[test]
    fn test_args_default_psm() {
        let args = LocalBackend::default().args(&RecognitionOptions::default());
        assert!(args.windows(2).any(|w| w == ["--psm", "6"]));
        assert!(!args.iter().any(|a| a.starts_with("tessedit_char_whitelist")));
    }

    #[test]
    fn test_classify_failure() {
        assert!(matches!(
            classify_failure("Error in pixReadMem: Unknown format: no pix returned"),
            OcrError::UnsupportedImage(_)
        ));
        assert!(matches!(
            classify_failure("Failed loading language 'xyz'"),
            OcrError::Backend(ref m) if m == "Failed loading language 'xyz'"
        ));
    }

    #[test]
    fn test_early_exit_classified_from_stderr() {
        let broken_pipe = std::io::Error::from(std::io::ErrorKind::BrokenPipe);
        assert!(matches!(
            engine_failure(Some(broken_pipe), false, "Error in pixReadMem: Unknown format"),
            Some(OcrError::UnsupportedImage(_))
        ));

        let broken_pipe = std::io::Error::from(std::io::ErrorKind::BrokenPipe);
        assert!(matches!(
            engine_failure(Some(broken_pipe), true, ""),
            Some(OcrError::Backend(ref m)) if m.starts_with("failed to write image")
        ));
        assert!(engine_failure(None, true, "Estimating resolution as 300").is_none());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_engine_rejecting_input_is_unsupported_image() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let engine = dir.path().join("engine");
        std::fs::write(&engine, "#!/bin/sh\necho 'Error in pixReadMem: Unknown format' >&2\nexit 1\n")
            .unwrap();
        std::fs::set_permissions(&engine, std::fs::Permissions::from_mode(0o755)).unwrap();

        let backend = LocalBackend::new(LocalConfig {
            binary: engine,
            ..Default::default()
        });
        // Larger than a pipe buffer, so the write usually fails first
        let err = backend
            .recognize(&EncodedImage::png(vec![0; 1 << 20]), &RecognitionOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, OcrError::UnsupportedImage(_)));
    }

    #[tokio::test]
    async fn test_missing_binary_is_backend_error() {
        let backend = LocalBackend::new(LocalConfig {
            binary: PathBuf::from("/nonexistent/snipocr-engine"),
            ..Default::default()
        });
        let err = backend
            .recognize(&EncodedImage::png(vec![0; 8]), &RecognitionOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, OcrError::Backend(_)));
        assert!(!backend.is_available());
    }
}
