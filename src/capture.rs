use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{info, warn};

/// What was in front of the user when the screen was captured.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CaptureContext {
    pub app_name: String,
    pub bundle_id: Option<String>,
    /// Window titles need Accessibility access; the app name stands in for it.
    pub window_title: String,
    pub captured_at: DateTime<Utc>,
}

impl CaptureContext {
    pub fn unknown(captured_at: DateTime<Utc>) -> Self {
        Self {
            app_name: "Unknown".to_string(),
            bundle_id: None,
            window_title: "Unknown".to_string(),
            captured_at,
        }
    }
}

#[async_trait]
pub trait ScreenCapturer: Send + Sync {
    /// Writes a PNG of the screen to `output_path`.
    async fn capture(&self, output_path: &Path) -> Result<CaptureContext>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct MacOsScreenCapturer;

const SCREENSHOT_TIMEOUT: Duration = Duration::from_secs(10);

const FRONTMOST_APP_SCRIPT: &str = r#"
tell application "System Events"
    set frontApp to first application process whose frontmost is true
    set frontName to name of frontApp
    set frontBundle to ""
    try
        set frontBundle to bundle identifier of frontApp
    on error
        set frontBundle to ""
    end try
end tell
return frontName & "\n" & frontBundle
"#;

#[async_trait]
impl ScreenCapturer for MacOsScreenCapturer {
    async fn capture(&self, output_path: &Path) -> Result<CaptureContext> {
        let captured_at = Utc::now();
        // Read the frontmost app first; the capture itself can steal focus.
        let context = match run_osascript(FRONTMOST_APP_SCRIPT).await {
            Ok(output) => parse_frontmost_app(&output, captured_at),
            Err(err) => {
                warn!(stage = "capture", "failed to read frontmost app: {err:#}");
                CaptureContext::unknown(captured_at)
            }
        };

        let mut command = Command::new("screencapture");
        command.arg("-x").arg("-t").arg("png").arg(output_path);

        let status = timeout(SCREENSHOT_TIMEOUT, command.status())
            .await
            .map_err(|_| {
                anyhow!(
                    "screencapture timed out after {:.0}s, check Screen Recording permission",
                    SCREENSHOT_TIMEOUT.as_secs_f32()
                )
            })?
            .context("failed to execute screencapture")?;

        if !status.success() {
            bail!("screencapture exited with status {status}");
        }

        info!(
            stage = "capture",
            app = %context.app_name,
            path = %output_path.display(),
            "screen captured"
        );
        Ok(context)
    }
}

fn parse_frontmost_app(output: &str, captured_at: DateTime<Utc>) -> CaptureContext {
    let mut lines = output.lines();
    let app_name = lines
        .next()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or("Unknown")
        .to_string();
    let bundle_id = lines
        .next()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string);

    CaptureContext {
        window_title: app_name.clone(),
        app_name,
        bundle_id,
        captured_at,
    }
}

async fn run_osascript(script: &str) -> Result<String> {
    let output = Command::new("osascript")
        .arg("-e")
        .arg(script)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
        .context("failed to spawn osascript")?;

    if output.status.success() {
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    } else {
        Err(anyhow!(
            "osascript failed: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        ))
    }
}

/// Writes a placeholder image instead of touching the screen.
#[derive(Debug, Clone)]
pub struct MockScreenCapturer {
    pub app_name: String,
}

impl Default for MockScreenCapturer {
    fn default() -> Self {
        Self {
            app_name: "Mock".to_string(),
        }
    }
}

#[async_trait]
impl ScreenCapturer for MockScreenCapturer {
    async fn capture(&self, output_path: &Path) -> Result<CaptureContext> {
        std::fs::write(output_path, b"mock-image").with_context(|| {
            format!(
                "failed to write mock screenshot at {}",
                output_path.display()
            )
        })?;
        Ok(CaptureContext {
            app_name: self.app_name.clone(),
            bundle_id: None,
            window_title: self.app_name.clone(),
            captured_at: Utc::now(),
        })
    }
}
