use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

use synthloop_generator::{
    file_to_data_url, image_data_url, ChunkCallback, Generator, VisualAttachments, VisualCritic,
};
use synthloop_verifier::{OutputCallback, OutputStream, TestResult};

use crate::check::{Check, CheckReport};
use crate::error::{CheckError, LoopError};

/// Reference design extensions, in lookup order
pub const REFERENCE_EXTENSIONS: [&str; 5] = ["png", "jpg", "jpeg", "svg", "webp"];

/// Used when the reference image has no readable PNG header
pub const FALLBACK_VIEWPORT: Viewport = Viewport {
    width: 1280,
    height: 800,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

/// Renders a page to PNG bytes
#[async_trait]
pub trait ScreenshotCapture: Send + Sync {
    async fn capture(&self, url: &str, viewport: Viewport) -> Result<Vec<u8>, CheckError>;
}

/// Captures with `npx playwright screenshot`
pub struct PlaywrightCapture {
    working_dir: PathBuf,
    output: PathBuf,
}

impl PlaywrightCapture {
    pub fn new(working_dir: impl Into<PathBuf>) -> Self {
        Self {
            working_dir: working_dir.into(),
            output: std::env::temp_dir().join(format!("synthloop-{}.png", std::process::id())),
        }
    }
}

#[async_trait]
impl ScreenshotCapture for PlaywrightCapture {
    async fn capture(&self, url: &str, viewport: Viewport) -> Result<Vec<u8>, CheckError> {
        debug!(url, width = viewport.width, height = viewport.height, "Capturing screenshot");

        let output = tokio::process::Command::new("npx")
            .arg("playwright")
            .arg("screenshot")
            .arg(format!("--viewport-size={},{}", viewport.width, viewport.height))
            .arg(url)
            .arg(&self.output)
            .current_dir(&self.working_dir)
            .stdin(std::process::Stdio::null())
            .output()
            .await
            .map_err(|e| CheckError::Capture(format!("failed to run npx playwright: {}", e)))?;

        if !output.status.success() {
            return Err(CheckError::Capture(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }

        tokio::fs::read(&self.output)
            .await
            .map_err(|source| CheckError::Io {
                path: self.output.clone(),
                source,
            })
    }
}

/// First sibling of `artifact` with a reference image extension
pub fn find_reference_image(artifact: &Path) -> Option<PathBuf> {
    REFERENCE_EXTENSIONS
        .iter()
        .map(|ext| artifact.with_extension(ext))
        .find(|candidate| candidate.is_file())
}

/// Width and height from a PNG IHDR chunk
pub fn png_dimensions(bytes: &[u8]) -> Option<Viewport> {
    const SIGNATURE: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a];

    if bytes.len() < 24 || bytes[..8] != SIGNATURE || &bytes[12..16] != b"IHDR" {
        return None;
    }
    let width = u32::from_be_bytes(bytes[16..20].try_into().ok()?);
    let height = u32::from_be_bytes(bytes[20..24].try_into().ok()?);
    (width > 0 && height > 0).then_some(Viewport { width, height })
}

/// Screenshot of a live page judged against a reference design by the critic
pub struct VisualCheck {
    url: String,
    design_url: String,
    viewport: Viewport,
    capture: Box<dyn ScreenshotCapture>,
    critic: VisualCritic,
    debug_dir: Option<PathBuf>,
}

impl VisualCheck {
    /// Load the reference design that sits next to `artifact`
    pub fn for_artifact(
        artifact: &Path,
        url: impl Into<String>,
        capture: Box<dyn ScreenshotCapture>,
        generator: Arc<dyn Generator>,
    ) -> Result<Self, LoopError> {
        let reference = find_reference_image(artifact).ok_or_else(|| {
            LoopError::ConfigError(format!(
                "No reference design found next to {} (looked for {})",
                artifact.display(),
                REFERENCE_EXTENSIONS.join(", ")
            ))
        })?;

        let design_url = file_to_data_url(&reference).map_err(|e| {
            LoopError::ConfigError(format!("Failed to read {}: {}", reference.display(), e))
        })?;
        let viewport = std::fs::read(&reference)
            .ok()
            .and_then(|bytes| png_dimensions(&bytes))
            .unwrap_or(FALLBACK_VIEWPORT);

        debug!(
            reference = %reference.display(),
            width = viewport.width,
            height = viewport.height,
            "Loaded reference design"
        );

        Ok(Self {
            url: url.into(),
            design_url,
            viewport,
            capture,
            critic: VisualCritic::new(generator),
            debug_dir: None,
        })
    }

    /// Also write both images to `dir` on every run
    pub fn with_debug_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.debug_dir = Some(dir.into());
        self
    }

    pub fn viewport(&self) -> Viewport {
        self.viewport
    }

    fn write_debug_copies(&self, screenshot: &[u8]) {
        let Some(dir) = &self.debug_dir else {
            return;
        };
        let result = std::fs::create_dir_all(dir)
            .and_then(|_| std::fs::write(dir.join("screenshot.png"), screenshot))
            .and_then(|_| std::fs::write(dir.join("design.url"), &self.design_url));
        if let Err(e) = result {
            warn!(error = %e, dir = %dir.display(), "Failed to write debug images");
        }
    }
}

#[async_trait]
impl Check for VisualCheck {
    fn describe(&self) -> String {
        format!("visual comparison of {}", self.url)
    }

    async fn run(&self, on_output: Option<OutputCallback>) -> Result<CheckReport, CheckError> {
        let screenshot = self.capture.capture(&self.url, self.viewport).await?;
        self.write_debug_copies(&screenshot);
        let screenshot_url = image_data_url(&screenshot, "image/png");

        let on_chunk: Option<ChunkCallback> = on_output.map(|cb| -> ChunkCallback {
            Arc::new(move |text: &str| cb(text, OutputStream::Stdout))
        });
        let verdict = self
            .critic
            .evaluate(&self.design_url, &screenshot_url, on_chunk)
            .await?;

        let result = if verdict.approved {
            TestResult::Success
        } else {
            TestResult::fail(verdict.feedback)
        };

        Ok(CheckReport {
            result,
            visual: Some(VisualAttachments {
                design_url: self.design_url.clone(),
                screenshot_url,
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use synthloop_generator::{CompletionRequest, GeneratorError};
    use tempfile::TempDir;

    fn png_header(width: u32, height: u32) -> Vec<u8> {
        let mut bytes = vec![0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a];
        bytes.extend_from_slice(&13u32.to_be_bytes());
        bytes.extend_from_slice(b"IHDR");
        bytes.extend_from_slice(&width.to_be_bytes());
        bytes.extend_from_slice(&height.to_be_bytes());
        bytes
    }

    struct FixedCapture;

    #[async_trait]
    impl ScreenshotCapture for FixedCapture {
        async fn capture(&self, _url: &str, _viewport: Viewport) -> Result<Vec<u8>, CheckError> {
            Ok(b"render".to_vec())
        }
    }

    struct Critic {
        reply: String,
        seen: Mutex<usize>,
    }

    #[async_trait]
    impl Generator for Critic {
        fn name(&self) -> &str {
            "critic"
        }

        async fn complete_with_callback(
            &self,
            _request: &CompletionRequest,
            on_chunk: Option<ChunkCallback>,
        ) -> Result<String, GeneratorError> {
            *self.seen.lock().unwrap() += 1;
            if let Some(cb) = on_chunk {
                cb(&self.reply);
            }
            Ok(self.reply.clone())
        }
    }

    fn critic(reply: &str) -> Arc<Critic> {
        Arc::new(Critic {
            reply: reply.to_string(),
            seen: Mutex::new(0),
        })
    }

    #[test]
    fn test_png_dimensions() {
        assert_eq!(
            png_dimensions(&png_header(640, 480)),
            Some(Viewport {
                width: 640,
                height: 480
            })
        );
        assert_eq!(png_dimensions(b"not a png at all, just some text"), None);
    }

    #[test]
    fn test_reference_lookup_order() {
        let dir = TempDir::new().unwrap();
        let artifact = dir.path().join("Button.tsx");
        std::fs::write(dir.path().join("Button.webp"), b"w").unwrap();
        std::fs::write(dir.path().join("Button.jpg"), b"j").unwrap();

        assert_eq!(find_reference_image(&artifact), Some(dir.path().join("Button.jpg")));
    }

    #[test]
    fn test_missing_reference_is_config_error() {
        let dir = TempDir::new().unwrap();
        let result = VisualCheck::for_artifact(
            &dir.path().join("Button.tsx"),
            "http://localhost:3000",
            Box::new(FixedCapture),
            critic("looks good"),
        );
        assert!(matches!(result, Err(LoopError::ConfigError(_))));
    }

    #[tokio::test]
    async fn test_visual_check_verdicts() {
        let dir = TempDir::new().unwrap();
        let artifact = dir.path().join("Button.tsx");
        std::fs::write(dir.path().join("Button.png"), png_header(320, 200)).unwrap();

        let approving = VisualCheck::for_artifact(
            &artifact,
            "http://localhost:3000",
            Box::new(FixedCapture),
            critic("\"Looks good\""),
        )
        .unwrap()
        .with_debug_dir(dir.path().join("debug/images"));
        assert_eq!(approving.viewport().width, 320);

        let report = approving.run(None).await.unwrap();
        assert!(report.result.is_success());
        let visual = report.visual.unwrap();
        assert!(visual.design_url.starts_with("data:image/png;base64,"));
        assert!(dir.path().join("debug/images/screenshot.png").exists());

        let rejecting = VisualCheck::for_artifact(
            &artifact,
            "http://localhost:3000",
            Box::new(FixedCapture),
            critic("The button should be blue"),
        )
        .unwrap();
        let streamed = Arc::new(Mutex::new(String::new()));
        let sink = streamed.clone();
        let report = rejecting
            .run(Some(Arc::new(move |text: &str, _stream: OutputStream| {
                sink.lock().unwrap().push_str(text);
            })))
            .await
            .unwrap();
        assert_eq!(report.result, TestResult::fail("The button should be blue"));
        assert_eq!(*streamed.lock().unwrap(), "The button should be blue");
    }
}
