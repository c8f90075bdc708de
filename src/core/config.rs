use std::path::PathBuf;
use std::time::Duration;

use crate::jobs::phase::{CheckpointPolicy, CourtSkipTrust, ScrapingMode};

// ---------------------------------------------------------------------------
// ScoutConfig: file-based config loader (docket-scout.json) with env-var fallback
// ---------------------------------------------------------------------------

pub const CONFIG_FILE_NAME: &str = "docket-scout.json";
pub const ENV_CONFIG_PATH: &str = "DOCKET_SCOUT_CONFIG";
pub const ENV_PORTAL_USERNAME: &str = "PORTAL_USERNAME";
pub const ENV_PORTAL_PASSWORD: &str = "PORTAL_PASSWORD";

fn env_string(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env_string(key).and_then(|v| v.parse().ok())
}

fn env_flag(key: &str) -> Option<bool> {
    let v = env_string(key)?.to_ascii_lowercase();
    match v.as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn default_state_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(".docket-scout")
}

/// Browser sub-config (mirrors the `browser` key in docket-scout.json).
#[derive(serde::Deserialize, Default, Clone, Debug)]
pub struct BrowserFileConfig {
    /// Run Chromium without a window. Defaults to `false` so the operator can
    /// watch and intervene.
    pub headless: Option<bool>,
    pub navigation_timeout_ms: Option<u64>,
    pub element_timeout_ms: Option<u64>,
    pub chrome_executable: Option<String>,
}

impl BrowserFileConfig {
    /// Headless: JSON field → `HEADLESS_MODE` env var → `false`.
    pub fn resolve_headless(&self) -> bool {
        self.headless
            .or_else(|| env_flag("HEADLESS_MODE"))
            .unwrap_or(false)
    }

    /// Page load timeout: JSON field → `PAGE_LOAD_TIMEOUT_MS` → 30 000 ms.
    pub fn resolve_navigation_timeout(&self) -> Duration {
        let ms = self
            .navigation_timeout_ms
            .or_else(|| env_parse("PAGE_LOAD_TIMEOUT_MS"))
            .unwrap_or(30_000);
        Duration::from_millis(ms)
    }

    /// Element wait timeout: JSON field → `ELEMENT_TIMEOUT_MS` → 15 000 ms.
    pub fn resolve_element_timeout(&self) -> Duration {
        let ms = self
            .element_timeout_ms
            .or_else(|| env_parse("ELEMENT_TIMEOUT_MS"))
            .unwrap_or(15_000);
        Duration::from_millis(ms)
    }

    /// Explicit browser binary: JSON field → `CHROME_EXECUTABLE` → `None`
    /// (auto-discovery, see `scraping::browser_manager::locate_browser`).
    pub fn resolve_chrome_executable(&self) -> Option<String> {
        self.chrome_executable
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(str::to_string)
            .or_else(|| env_string("CHROME_EXECUTABLE"))
    }

    pub fn settings(&self) -> BrowserSettings {
        BrowserSettings {
            headless: self.resolve_headless(),
            navigation_timeout: self.resolve_navigation_timeout(),
            element_timeout: self.resolve_element_timeout(),
            chrome_executable: self.resolve_chrome_executable(),
        }
    }
}

/// Resolved browser settings handed to each job's collaborator.
#[derive(Clone, Debug)]
pub struct BrowserSettings {
    pub headless: bool,
    pub navigation_timeout: Duration,
    pub element_timeout: Duration,
    pub chrome_executable: Option<String>,
}

impl Default for BrowserSettings {
    fn default() -> Self {
        BrowserFileConfig::default().settings()
    }
}

#[derive(serde::Deserialize, Default, Clone, Debug)]
pub struct PathsFileConfig {
    pub downloads_dir: Option<String>,
    pub diagnostics_dir: Option<String>,
}

impl PathsFileConfig {
    /// Downloads root: JSON field → `DOWNLOADS_DIR` → `~/.docket-scout/downloads`.
    pub fn resolve_downloads_dir(&self) -> PathBuf {
        self.downloads_dir
            .clone()
            .or_else(|| env_string("DOWNLOADS_DIR"))
            .map(PathBuf::from)
            .unwrap_or_else(|| default_state_dir().join("downloads"))
    }

    /// Screenshot directory: JSON field → `DIAGNOSTICS_DIR` → `~/.docket-scout/diagnostics`.
    pub fn resolve_diagnostics_dir(&self) -> PathBuf {
        self.diagnostics_dir
            .clone()
            .or_else(|| env_string("DIAGNOSTICS_DIR"))
            .map(PathBuf::from)
            .unwrap_or_else(|| default_state_dir().join("diagnostics"))
    }
}

/// Selector table for the portal pages. Every field has a default so a config
/// file only needs to list what differs.
#[derive(serde::Deserialize, Clone, Debug)]
#[serde(default)]
pub struct PortalSelectors {
    pub login_url: String,
    pub username_input: String,
    pub password_input: String,
    pub submit_button: String,
    /// Present only once the session is authenticated.
    pub logged_in_marker: String,
    pub login_error: String,
    pub keywords_input: String,
    pub court_input: String,
    /// Labels of the court filter options shown after typing into `court_input`.
    pub court_options: String,
    pub court_selected: String,
    pub judge_input: String,
    pub search_button: String,
    pub results_container: String,
    pub result_links: String,
    pub docket_section: String,
    pub entry_rows: String,
    pub entry_number: String,
    pub filed_date: String,
    pub description: String,
    pub download_link: String,
    /// Case-insensitive regexes flagging entries worth downloading.
    pub transcript_patterns: Vec<String>,
}

impl Default for PortalSelectors {
    fn default() -> Self {
        Self {
            login_url: "https://portal.example.com/login".to_string(),
            username_input: "input[name='username']".to_string(),
            password_input: "input[name='password']".to_string(),
            submit_button: "button[type='submit']".to_string(),
            logged_in_marker: "[data-role='account-menu']".to_string(),
            login_error: ".login-error, [role='alert']".to_string(),
            keywords_input: "input[name='keywords']".to_string(),
            court_input: "input[name='court']".to_string(),
            court_options: ".court-filter label".to_string(),
            court_selected: ".court-filter input:checked + label".to_string(),
            judge_input: "input[name='judge']".to_string(),
            search_button: "button.search-submit".to_string(),
            results_container: ".search-results".to_string(),
            result_links: ".search-results a.result-title".to_string(),
            docket_section: "#docket-entries".to_string(),
            entry_rows: "#docket-entries tbody tr".to_string(),
            entry_number: "td.entry-number".to_string(),
            filed_date: "td.filed-date".to_string(),
            description: "td.description".to_string(),
            download_link: "a.download".to_string(),
            transcript_patterns: vec![
                r"\btranscript\b".to_string(),
                r"\bhearing\s+held\b".to_string(),
                r"\bproceedings\b".to_string(),
            ],
        }
    }
}

/// Portal credentials. Only ever read from the environment, never logged.
#[derive(Clone)]
pub struct PortalCredentials {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for PortalCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PortalCredentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

impl PortalCredentials {
    pub fn from_env() -> Option<Self> {
        Some(Self {
            username: env_string(ENV_PORTAL_USERNAME)?,
            password: std::env::var(ENV_PORTAL_PASSWORD).ok().filter(|p| !p.is_empty())?,
        })
    }
}

/// Listener sub-config (the `server` key).
#[derive(serde::Deserialize, Default, Clone, Debug)]
pub struct ServerFileConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
}

impl ServerFileConfig {
    /// Bind address. Port: `--port` flag → JSON field → `DOCKET_SCOUT_PORT` →
    /// `PORT` → 8000. Host: JSON field → `HOST` → `0.0.0.0`.
    pub fn resolve_bind_addr(&self, port_flag: Option<u16>) -> String {
        let port = port_flag
            .or(self.port)
            .or_else(|| env_parse("DOCKET_SCOUT_PORT"))
            .or_else(|| env_parse("PORT"))
            .unwrap_or(8000);
        let host = self
            .host
            .clone()
            .or_else(|| env_string("HOST"))
            .unwrap_or_else(|| "0.0.0.0".to_string());
        format!("{host}:{port}")
    }
}

/// Top-level config loaded from `docket-scout.json`.
#[derive(serde::Deserialize, Default, Clone, Debug)]
pub struct ScoutConfig {
    pub scraping_mode: Option<String>,
    pub interaction_timeout_secs: Option<u64>,
    pub court_skip_trust: Option<String>,
    pub max_active_jobs: Option<usize>,
    #[serde(default)]
    pub server: ServerFileConfig,
    #[serde(default)]
    pub browser: BrowserFileConfig,
    #[serde(default)]
    pub paths: PathsFileConfig,
    #[serde(default)]
    pub portal: PortalSelectors,
}

impl ScoutConfig {
    /// Checkpoint mode: JSON field → `SCRAPING_MODE` → `FULLY_INTERACTIVE`.
    /// Unrecognised values fall back to the default with a warning.
    pub fn resolve_scraping_mode(&self) -> ScrapingMode {
        let raw = self
            .scraping_mode
            .clone()
            .or_else(|| env_string("SCRAPING_MODE"));
        match raw {
            Some(raw) => ScrapingMode::parse(&raw).unwrap_or_else(|| {
                tracing::warn!("unknown scraping_mode '{}'; using FULLY_INTERACTIVE", raw);
                ScrapingMode::default()
            }),
            None => ScrapingMode::default(),
        }
    }

    /// Operator reply timeout: JSON field → `INTERACTION_TIMEOUT_SECS` → 300 s.
    /// `0` waits forever.
    pub fn resolve_interaction_timeout(&self) -> Option<Duration> {
        let secs = self
            .interaction_timeout_secs
            .or_else(|| env_parse("INTERACTION_TIMEOUT_SECS"))
            .unwrap_or(300);
        (secs > 0).then(|| Duration::from_secs(secs))
    }

    /// Court-skip policy: JSON field → `COURT_SKIP_TRUST` → `trust`.
    pub fn resolve_court_skip_trust(&self) -> CourtSkipTrust {
        let raw = self
            .court_skip_trust
            .clone()
            .or_else(|| env_string("COURT_SKIP_TRUST"));
        match raw {
            Some(raw) => CourtSkipTrust::parse(&raw).unwrap_or_else(|| {
                tracing::warn!("unknown court_skip_trust '{}'; using trust", raw);
                CourtSkipTrust::default()
            }),
            None => CourtSkipTrust::default(),
        }
    }

    /// Concurrent job limit: JSON field → `MAX_ACTIVE_JOBS` → 4.
    pub fn resolve_max_active_jobs(&self) -> usize {
        self.max_active_jobs
            .or_else(|| env_parse("MAX_ACTIVE_JOBS"))
            .unwrap_or(4)
            .max(1)
    }

    pub fn checkpoint_policy(&self) -> CheckpointPolicy {
        CheckpointPolicy {
            mode: self.resolve_scraping_mode(),
            court_skip_trust: self.resolve_court_skip_trust(),
            interaction_timeout: self.resolve_interaction_timeout(),
        }
    }
}

/// Load `docket-scout.json` from standard locations.
///
/// Search order (first found wins):
/// 1. `DOCKET_SCOUT_CONFIG` env var path
/// 2. `./docket-scout.json`
/// 3. `../docket-scout.json`
///
/// Missing file → `ScoutConfig::default()` (silent, all env-var fallbacks apply).
/// Parse error → log a warning, return `ScoutConfig::default()`.
pub fn load_scout_config() -> ScoutConfig {
    let mut candidates = vec![
        PathBuf::from(CONFIG_FILE_NAME),
        PathBuf::from("..").join(CONFIG_FILE_NAME),
    ];
    if let Some(env_path) = env_string(ENV_CONFIG_PATH) {
        candidates.insert(0, PathBuf::from(env_path));
    }

    for path in &candidates {
        let Ok(contents) = std::fs::read_to_string(path) else {
            continue;
        };
        return match serde_json::from_str::<ScoutConfig>(&contents) {
            Ok(cfg) => {
                tracing::info!("{} loaded from {}", CONFIG_FILE_NAME, path.display());
                cfg
            }
            Err(e) => {
                tracing::warn!(
                    "{} parse error at {}: {}; using defaults",
                    CONFIG_FILE_NAME,
                    path.display(),
                    e
                );
                ScoutConfig::default()
            }
        };
    }

    ScoutConfig::default()
}
