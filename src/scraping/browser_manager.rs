//! Chromium session lifecycle for portal jobs.
//!
//! Each job gets its own browser process with a private profile directory, so
//! concurrent jobs never share cookies or a portal login. The window is
//! visible unless `headless` is configured, which lets the operator finish a
//! court choice in the page itself.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chromiumoxide::browser::BrowserConfig;
use chromiumoxide::cdp::browser_protocol::browser::{
    SetDownloadBehaviorBehavior, SetDownloadBehaviorParams,
};
use chromiumoxide::cdp::browser_protocol::page::CaptureScreenshotFormat;
use chromiumoxide::error::CdpError;
use chromiumoxide::handler::viewport::Viewport;
use chromiumoxide::page::ScreenshotParams;
use chromiumoxide::{Browser, Handler, Page};
use futures::StreamExt;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::core::config::BrowserSettings;

const WINDOW_WIDTH: u32 = 1366;
const WINDOW_HEIGHT: u32 = 900;

const PATH_NAMES: &[&str] = &[
    "google-chrome",
    "google-chrome-stable",
    "chromium",
    "chromium-browser",
    "chrome",
];

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("no Chromium-family browser found; install Chrome or Chromium, or set CHROME_EXECUTABLE")]
    NoExecutable,
    #[error("invalid browser config: {0}")]
    Config(String),
    #[error("failed to launch {exe}: {source}")]
    Launch {
        exe: String,
        #[source]
        source: CdpError,
    },
    #[error("failed to open a tab: {0}")]
    Tab(#[source] CdpError),
    #[error("screenshot failed: {0}")]
    Screenshot(#[source] CdpError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

fn install_paths() -> &'static [&'static str] {
    #[cfg(target_os = "macos")]
    {
        &[
            "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
            "/Applications/Chromium.app/Contents/MacOS/Chromium",
        ]
    }
    #[cfg(target_os = "windows")]
    {
        &[
            r"C:\Program Files\Google\Chrome\Application\chrome.exe",
            r"C:\Program Files (x86)\Google\Chrome\Application\chrome.exe",
        ]
    }
    #[cfg(not(any(target_os = "macos", target_os = "windows")))]
    {
        &[
            "/usr/bin/google-chrome",
            "/usr/bin/chromium",
            "/usr/bin/chromium-browser",
            "/snap/bin/chromium",
        ]
    }
}

/// Locate a browser: the configured path if it exists, then `PATH`, then the
/// platform's usual install locations.
pub fn locate_browser(configured: Option<&str>) -> Option<PathBuf> {
    if let Some(p) = configured {
        let path = PathBuf::from(p);
        if path.is_file() {
            return Some(path);
        }
        warn!("configured browser {} not found; searching PATH", p);
    }

    let on_path = std::env::var_os("PATH").and_then(|paths| {
        std::env::split_paths(&paths)
            .flat_map(|dir| PATH_NAMES.iter().map(move |name| dir.join(name)))
            .find(|candidate| candidate.is_file())
    });

    on_path.or_else(|| {
        install_paths()
            .iter()
            .map(PathBuf::from)
            .find(|p| p.is_file())
    })
}

/// Extra Chromium switches for a portal session.
pub fn launch_args(settings: &BrowserSettings) -> Vec<String> {
    let mut args: Vec<String> = [
        "--no-first-run",
        "--no-default-browser-check",
        "--disable-dev-shm-usage",
        "--disable-extensions",
        "--disable-sync",
        "--disable-translate",
        "--disable-popup-blocking",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();

    // Container runs are usually root, where the sandbox refuses to start.
    if settings.headless {
        args.push("--no-sandbox".to_string());
        args.push("--disable-gpu".to_string());
    }
    args
}

/// Private profile directory for one job.
pub fn profile_dir(job_id: &str) -> PathBuf {
    std::env::temp_dir()
        .join("docket-scout-profiles")
        .join(job_id)
}

fn session_config(
    exe: &Path,
    settings: &BrowserSettings,
    profile: &Path,
) -> Result<BrowserConfig, SessionError> {
    let mut builder = BrowserConfig::builder()
        .chrome_executable(exe)
        .user_data_dir(profile)
        .viewport(Viewport {
            width: WINDOW_WIDTH,
            height: WINDOW_HEIGHT,
            device_scale_factor: Some(1.0),
            emulating_mobile: false,
            is_landscape: true,
            has_touch: false,
        })
        .window_size(WINDOW_WIDTH, WINDOW_HEIGHT)
        .request_timeout(settings.navigation_timeout)
        .args(launch_args(settings));

    if !settings.headless {
        builder = builder.with_head();
    }
    builder.build().map_err(SessionError::Config)
}

fn drive_handler(mut handler: Handler, closed: Arc<AtomicBool>) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = handler.next().await {
            if let Err(e) = event {
                debug!("cdp handler: {}", e);
            }
        }
        closed.store(true, Ordering::SeqCst);
    })
}

/// One browser process and its single working tab.
pub struct BrowserSession {
    browser: Option<Browser>,
    pub page: Page,
    handler: JoinHandle<()>,
    closed: Arc<AtomicBool>,
    profile: PathBuf,
}

impl BrowserSession {
    pub async fn launch(
        settings: &BrowserSettings,
        job_id: &str,
        downloads_dir: &Path,
    ) -> Result<Self, SessionError> {
        let exe = locate_browser(settings.chrome_executable.as_deref())
            .ok_or(SessionError::NoExecutable)?;
        let profile = profile_dir(job_id);
        tokio::fs::create_dir_all(&profile).await?;

        info!(
            job_id,
            headless = settings.headless,
            "launching {}",
            exe.display()
        );
        let config = session_config(&exe, settings, &profile)?;
        let (browser, handler) =
            Browser::launch(config)
                .await
                .map_err(|source| SessionError::Launch {
                    exe: exe.display().to_string(),
                    source,
                })?;

        let closed = Arc::new(AtomicBool::new(false));
        let handler = drive_handler(handler, Arc::clone(&closed));

        // Downloads the operator starts by hand land next to the fetched ones.
        let mut downloads = SetDownloadBehaviorParams::new(SetDownloadBehaviorBehavior::Allow);
        downloads.download_path = Some(downloads_dir.to_string_lossy().into_owned());
        if let Err(e) = browser.execute(downloads).await {
            warn!(job_id, "could not set download directory: {}", e);
        }

        let page = browser
            .new_page("about:blank")
            .await
            .map_err(SessionError::Tab)?;

        Ok(Self {
            browser: Some(browser),
            page,
            handler,
            closed,
            profile,
        })
    }

    /// True once the CDP connection is gone, e.g. the operator closed the window.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub async fn screenshot_to(&self, path: &Path) -> Result<PathBuf, SessionError> {
        let png = self
            .page
            .screenshot(
                ScreenshotParams::builder()
                    .format(CaptureScreenshotFormat::Png)
                    .full_page(true)
                    .build(),
            )
            .await
            .map_err(SessionError::Screenshot)?;
        if let Some(dir) = path.parent() {
            tokio::fs::create_dir_all(dir).await?;
        }
        tokio::fs::write(path, &png).await?;
        Ok(path.to_path_buf())
    }

    /// Close the browser and remove the profile. Idempotent.
    pub async fn close(&mut self) {
        let Some(mut browser) = self.browser.take() else {
            return;
        };
        if let Err(e) = browser.close().await {
            warn!("browser close: {}", e);
        }
        let _ = browser.wait().await;
        self.handler.abort();
        self.closed.store(true, Ordering::SeqCst);
        if let Err(e) = tokio::fs::remove_dir_all(&self.profile).await {
            debug!("profile cleanup {}: {}", self.profile.display(), e);
        }
    }
}

impl Drop for BrowserSession {
    fn drop(&mut self) {
        self.handler.abort();
        let Some(mut browser) = self.browser.take() else {
            return;
        };
        // No await in Drop; hand the close to the runtime when one is around.
        if let Ok(rt) = tokio::runtime::Handle::try_current() {
            rt.spawn(async move {
                let _ = browser.close().await;
                let _ = browser.wait().await;
            });
        }
    }
}
