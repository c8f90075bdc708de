//! chromiumoxide-backed portal collaborator.
//!
//! Drives the portal pages through a [`PortalSelectors`] table. All DOM work
//! happens in small evaluated scripts; element waits poll until the element
//! timeout and then fail with `ElementNotFound`.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use base64::Engine;
use chromiumoxide::error::CdpError;
use chromiumoxide::Page;
use chrono::Utc;
use regex::{Regex, RegexBuilder};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, info, warn};
use url::Url;

use super::automation::{
    AutomationFactory, AutomationFault, AutomationResult, CourtCandidates, CourtChoice,
    DocketEntry, DocumentRef, FaultKind, FileDescriptor, PortalAutomation,
};
use super::browser_manager::BrowserSession;
use super::court_match;
use crate::core::config::{BrowserSettings, PortalCredentials, PortalSelectors, ScoutConfig};
use crate::jobs::record::{JobRecord, SearchCriteria};

const POLL_INTERVAL: Duration = Duration::from_millis(250);
const COURT_FILTER_SETTLE: Duration = Duration::from_millis(1500);

/// JSON string literal for embedding untrusted text in a script.
fn js(value: &str) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "\"\"".to_string())
}

/// Compile transcript patterns case-insensitively, skipping invalid ones.
pub fn compile_patterns(patterns: &[String]) -> Vec<Regex> {
    patterns
        .iter()
        .filter_map(|p| match RegexBuilder::new(p).case_insensitive(true).build() {
            Ok(re) => Some(re),
            Err(e) => {
                warn!("ignoring invalid transcript pattern '{}': {}", p, e);
                None
            }
        })
        .collect()
}

/// First pattern matching `description`, as written in the config.
pub fn first_matching_pattern(patterns: &[Regex], description: &str) -> Option<String> {
    patterns
        .iter()
        .find(|re| re.is_match(description))
        .map(|re| re.as_str().to_string())
}

/// File name for a downloaded entry: `<title>_<entry>.pdf`, filesystem-safe.
pub fn entry_filename(title: &str, entry_num: &str) -> String {
    let clean = |s: &str, max: usize| -> String {
        let mut out: String = s
            .trim()
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
            .collect();
        while out.contains("__") {
            out = out.replace("__", "_");
        }
        out.trim_matches('_').chars().take(max).collect()
    };
    let title = clean(title, 80);
    let entry = clean(entry_num, 20);
    match (title.is_empty(), entry.is_empty()) {
        (true, true) => "document.pdf".to_string(),
        (true, false) => format!("entry_{entry}.pdf"),
        (false, true) => format!("{title}.pdf"),
        (false, false) => format!("{title}_{entry}.pdf"),
    }
}

fn classify_cdp(context: &str, e: CdpError) -> AutomationFault {
    match e {
        CdpError::Timeout => AutomationFault::navigation_timeout(format!("{context}: timed out")),
        other => AutomationFault::other(format!("{context}: {other}")),
    }
}

#[derive(Debug, Deserialize)]
struct RawLink {
    title: String,
    href: String,
}

#[derive(Debug, Deserialize)]
struct RawEntry {
    entry_num: String,
    filed_date: String,
    description: String,
    href: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FetchedBytes {
    ok: bool,
    status: Option<u16>,
    data: Option<String>,
}

/// Shared, per-process inputs for building one [`CdpPortal`] per job.
pub struct CdpPortalFactory {
    settings: BrowserSettings,
    selectors: Arc<PortalSelectors>,
    patterns: Arc<Vec<Regex>>,
    downloads_dir: PathBuf,
    diagnostics_dir: PathBuf,
    credentials: Option<PortalCredentials>,
}

impl CdpPortalFactory {
    pub fn from_config(config: &ScoutConfig) -> Self {
        let credentials = PortalCredentials::from_env();
        if credentials.is_none() {
            warn!("PORTAL_USERNAME / PORTAL_PASSWORD not set; logins will be rejected");
        }
        Self {
            settings: config.browser.settings(),
            patterns: Arc::new(compile_patterns(&config.portal.transcript_patterns)),
            selectors: Arc::new(config.portal.clone()),
            downloads_dir: config.paths.resolve_downloads_dir(),
            diagnostics_dir: config.paths.resolve_diagnostics_dir(),
            credentials,
        }
    }
}

impl AutomationFactory for CdpPortalFactory {
    fn create(&self, job: &JobRecord) -> AutomationResult<Box<dyn PortalAutomation>> {
        Ok(Box::new(CdpPortal {
            job_id: job.job_id.clone(),
            settings: self.settings.clone(),
            selectors: self.selectors.clone(),
            patterns: self.patterns.clone(),
            downloads_dir: self.downloads_dir.join(&job.job_id),
            diagnostics_dir: self.diagnostics_dir.clone(),
            credentials: self.credentials.clone(),
            session: None,
            pending_judge: String::new(),
            results_url: None,
        }))
    }
}

pub struct CdpPortal {
    job_id: String,
    settings: BrowserSettings,
    selectors: Arc<PortalSelectors>,
    patterns: Arc<Vec<Regex>>,
    downloads_dir: PathBuf,
    diagnostics_dir: PathBuf,
    credentials: Option<PortalCredentials>,
    session: Option<BrowserSession>,
    pending_judge: String,
    results_url: Option<String>,
}

impl CdpPortal {
    fn page(&self) -> AutomationResult<&Page> {
        match &self.session {
            Some(s) if !s.is_closed() => Ok(&s.page),
            Some(_) => Err(AutomationFault::new(
                FaultKind::BrowserUnavailable,
                "browser window was closed",
            )),
            None => Err(AutomationFault::new(
                FaultKind::BrowserUnavailable,
                "browser not launched",
            )),
        }
    }

    async fn eval<T: DeserializeOwned>(&self, script: String) -> AutomationResult<T> {
        let page = self.page()?;
        page.evaluate(script)
            .await
            .map_err(|e| classify_cdp("script", e))?
            .into_value::<T>()
            .map_err(|e| AutomationFault::other(format!("unexpected script result: {e}")))
    }

    async fn exists(&self, selector: &str) -> bool {
        self.eval::<bool>(format!("() => document.querySelector({}) !== null", js(selector)))
            .await
            .unwrap_or(false)
    }

    async fn wait_for(&self, selector: &str, timeout: Duration) -> AutomationResult<()> {
        let start = Instant::now();
        loop {
            if self.exists(selector).await {
                return Ok(());
            }
            if start.elapsed() >= timeout {
                return Err(AutomationFault::element_not_found(format!(
                    "'{}' did not appear within {}ms",
                    selector,
                    timeout.as_millis()
                )));
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    async fn navigate(&self, url: &str) -> AutomationResult<()> {
        let page = self.page()?;
        match tokio::time::timeout(self.settings.navigation_timeout, page.goto(url)).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => Err(classify_cdp(&format!("goto {url}"), e)),
            Err(_) => Err(AutomationFault::navigation_timeout(format!(
                "goto {url} exceeded {}ms",
                self.settings.navigation_timeout.as_millis()
            ))),
        }
    }

    async fn fill(&self, selector: &str, value: &str) -> AutomationResult<()> {
        self.wait_for(selector, self.settings.element_timeout).await?;
        let script = format!(
            r#"() => {{
                const el = document.querySelector({sel});
                if (!el) return false;
                el.focus();
                el.value = {val};
                el.dispatchEvent(new Event('input', {{ bubbles: true }}));
                el.dispatchEvent(new Event('change', {{ bubbles: true }}));
                return true;
            }}"#,
            sel = js(selector),
            val = js(value),
        );
        if self.eval::<bool>(script).await? {
            Ok(())
        } else {
            Err(AutomationFault::element_not_found(format!("'{selector}' vanished before fill")))
        }
    }

    async fn click(&self, selector: &str) -> AutomationResult<()> {
        self.wait_for(selector, self.settings.element_timeout).await?;
        let script = format!(
            "() => {{ const el = document.querySelector({}); if (!el) return false; el.click(); return true; }}",
            js(selector)
        );
        if self.eval::<bool>(script).await? {
            Ok(())
        } else {
            Err(AutomationFault::element_not_found(format!("'{selector}' vanished before click")))
        }
    }

    async fn texts(&self, selector: &str) -> AutomationResult<Vec<String>> {
        self.eval(format!(
            "() => Array.from(document.querySelectorAll({})).map(e => (e.innerText || e.textContent || '').trim())",
            js(selector)
        ))
        .await
    }

    async fn current_url(&self) -> Option<String> {
        self.eval::<String>("() => location.href".to_string()).await.ok()
    }

    fn resolve_link(base: Option<&str>, href: &str) -> String {
        base.and_then(|b| Url::parse(b).ok())
            .and_then(|b| b.join(href).ok())
            .map(|u| u.to_string())
            .unwrap_or_else(|| href.to_string())
    }

    fn credentials(&self) -> AutomationResult<&PortalCredentials> {
        self.credentials
            .as_ref()
            .ok_or_else(|| AutomationFault::auth_rejected("portal credentials are not configured"))
    }
}

#[async_trait]
impl PortalAutomation for CdpPortal {
    async fn launch(&mut self) -> AutomationResult<()> {
        if self.session.is_some() {
            return Ok(());
        }
        if let Err(e) = tokio::fs::create_dir_all(&self.downloads_dir).await {
            warn!(job_id = %self.job_id, "could not create {}: {}", self.downloads_dir.display(), e);
        }
        let session = BrowserSession::launch(&self.settings, &self.job_id, &self.downloads_dir)
            .await
            .map_err(|e| AutomationFault::new(FaultKind::BrowserUnavailable, e.to_string()))?;
        self.session = Some(session);
        Ok(())
    }

    async fn login(&mut self) -> AutomationResult<()> {
        let s = self.selectors.clone();
        self.navigate(&s.login_url).await?;

        if self.exists(&s.logged_in_marker).await {
            info!(job_id = %self.job_id, "portal session already authenticated");
            return Ok(());
        }

        let creds = self.credentials()?.clone();
        self.fill(&s.username_input, &creds.username).await?;
        self.fill(&s.password_input, &creds.password).await?;
        self.click(&s.submit_button).await?;

        let start = Instant::now();
        while start.elapsed() < self.settings.navigation_timeout {
            if self.exists(&s.logged_in_marker).await {
                info!(job_id = %self.job_id, "logged in");
                return Ok(());
            }
            if self.exists(&s.login_error).await {
                let message = self
                    .texts(&s.login_error)
                    .await
                    .ok()
                    .and_then(|t| t.into_iter().find(|m| !m.is_empty()))
                    .unwrap_or_else(|| "login rejected".to_string());
                return Err(AutomationFault::auth_rejected(message));
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
        Err(AutomationFault::auth_rejected(
            "login did not complete before the navigation timeout",
        ))
    }

    async fn search(&mut self, criteria: &SearchCriteria) -> AutomationResult<CourtCandidates> {
        let s = self.selectors.clone();
        self.fill(&s.keywords_input, &criteria.keywords).await?;
        self.pending_judge = criteria.judge_name.clone();

        self.fill(&s.court_input, &criteria.court_name).await?;
        tokio::time::sleep(COURT_FILTER_SETTLE).await;
        let options = self.texts(&s.court_options).await?;
        let candidates = court_match::classify(&criteria.court_name, &options);
        info!(
            job_id = %self.job_id,
            "{} court options ({} exact, {} fuzzy)",
            candidates.options.len(),
            candidates.exact_matches.len(),
            candidates.fuzzy_matches.len()
        );
        Ok(candidates)
    }

    async fn submit_search(&mut self, court: &CourtChoice) -> AutomationResult<Vec<DocumentRef>> {
        let s = self.selectors.clone();
        if let CourtChoice::Selected(name) = court {
            let script = format!(
                r#"() => {{
                    const want = {name};
                    const el = Array.from(document.querySelectorAll({sel}))
                        .find(e => (e.innerText || e.textContent || '').trim() === want);
                    if (!el) return false;
                    el.click();
                    return true;
                }}"#,
                name = js(name),
                sel = js(&s.court_options),
            );
            if !self.eval::<bool>(script).await? {
                return Err(AutomationFault::element_not_found(format!(
                    "court option '{name}' not found"
                )));
            }
        }

        if !self.pending_judge.trim().is_empty() {
            let judge = self.pending_judge.clone();
            self.fill(&s.judge_input, &judge).await?;
        }
        self.click(&s.search_button).await?;
        self.wait_for(&s.results_container, self.settings.navigation_timeout)
            .await
            .map_err(|f| AutomationFault::navigation_timeout(f.message))?;

        let base = self.current_url().await;
        let links: Vec<RawLink> = self
            .eval(format!(
                "() => Array.from(document.querySelectorAll({})).map(a => ({{ title: (a.innerText || a.textContent || '').trim(), href: a.getAttribute('href') || '' }}))",
                js(&s.result_links)
            ))
            .await?;
        self.results_url = base.clone();

        let documents: Vec<DocumentRef> = links
            .into_iter()
            .filter(|l| !l.href.is_empty())
            .enumerate()
            .map(|(i, l)| DocumentRef {
                ordinal: i + 1,
                title: l.title,
                url: Self::resolve_link(base.as_deref(), &l.href),
            })
            .collect();
        info!(job_id = %self.job_id, "{} search results", documents.len());
        Ok(documents)
    }

    async fn current_court(&mut self) -> AutomationResult<Option<String>> {
        let texts = self.texts(&self.selectors.court_selected).await?;
        Ok(texts.into_iter().find(|t| !t.is_empty()))
    }

    async fn open_document(&mut self, document: &DocumentRef) -> AutomationResult<Vec<DocketEntry>> {
        let s = self.selectors.clone();
        self.navigate(&document.url).await?;
        self.wait_for(&s.docket_section, self.settings.element_timeout).await?;

        let script = format!(
            r#"() => Array.from(document.querySelectorAll({rows})).map(row => {{
                const text = sel => {{ const el = row.querySelector(sel); return el ? (el.innerText || el.textContent || '').trim() : ''; }};
                const link = row.querySelector({link});
                return {{
                    entry_num: text({num}),
                    filed_date: text({date}),
                    description: text({desc}),
                    href: link ? link.getAttribute('href') : null,
                }};
            }})"#,
            rows = js(&s.entry_rows),
            link = js(&s.download_link),
            num = js(&s.entry_number),
            date = js(&s.filed_date),
            desc = js(&s.description),
        );
        let raw: Vec<RawEntry> = self.eval(script).await?;
        let base = self.current_url().await;

        let entries: Vec<DocketEntry> = raw
            .into_iter()
            .filter_map(|r| {
                let href = r.href.filter(|h| !h.trim().is_empty())?;
                Some(DocketEntry {
                    matched_pattern: first_matching_pattern(&self.patterns, &r.description),
                    download_url: Some(Self::resolve_link(base.as_deref(), &href)),
                    entry_num: r.entry_num,
                    filed_date: r.filed_date,
                    description: r.description,
                })
            })
            .collect();
        debug!(
            job_id = %self.job_id,
            "{} downloadable entries ({} flagged)",
            entries.len(),
            entries.iter().filter(|e| e.matches_pattern()).count()
        );
        Ok(entries)
    }

    async fn download(
        &mut self,
        document: &DocumentRef,
        entry: &DocketEntry,
    ) -> AutomationResult<FileDescriptor> {
        let url = entry.download_url.as_deref().ok_or_else(|| {
            AutomationFault::download_failed(format!("entry {} has no download link", entry.entry_num))
        })?;

        let script = format!(
            r#"async () => {{
                const resp = await fetch({url}, {{ credentials: 'include' }});
                if (!resp.ok) return {{ ok: false, status: resp.status }};
                const bytes = new Uint8Array(await resp.arrayBuffer());
                let bin = '';
                for (let i = 0; i < bytes.length; i += 0x8000) {{
                    bin += String.fromCharCode.apply(null, bytes.subarray(i, i + 0x8000));
                }}
                return {{ ok: true, status: resp.status, data: btoa(bin) }};
            }}"#,
            url = js(url),
        );
        let fetched: FetchedBytes = self
            .eval(script)
            .await
            .map_err(|f| AutomationFault::download_failed(f.message))?;
        let data = match (fetched.ok, fetched.data) {
            (true, Some(data)) => data,
            _ => {
                return Err(AutomationFault::download_failed(format!(
                    "entry {}: HTTP {}",
                    entry.entry_num,
                    fetched.status.unwrap_or(0)
                )))
            }
        };
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(data.as_bytes())
            .map_err(|e| AutomationFault::download_failed(format!("bad payload: {e}")))?;
        if bytes.is_empty() {
            return Err(AutomationFault::download_failed(format!(
                "entry {} returned an empty file",
                entry.entry_num
            )));
        }

        let filename = entry_filename(&document.title, &entry.entry_num);
        let path = self.downloads_dir.join(&filename);
        write_file(&path, &bytes)
            .await
            .map_err(|e| AutomationFault::download_failed(format!("write {}: {e}", path.display())))?;
        info!(job_id = %self.job_id, "saved {} ({} bytes)", path.display(), bytes.len());

        Ok(FileDescriptor {
            filename,
            path: path.to_string_lossy().to_string(),
            downloaded_at: Utc::now(),
        })
    }

    async fn go_back(&mut self) -> AutomationResult<()> {
        match self.results_url.clone() {
            Some(url) => self.navigate(&url).await,
            None => {
                self.eval::<bool>("() => { history.back(); return true; }".to_string())
                    .await?;
                Ok(())
            }
        }
    }

    async fn capture_diagnostic(&mut self, label: &str) -> Option<String> {
        let session = self.session.as_ref()?;
        let path = self
            .diagnostics_dir
            .join(format!("{}_{}.png", self.job_id, label));
        match session.screenshot_to(&path).await {
            Ok(p) => Some(p.to_string_lossy().to_string()),
            Err(e) => {
                warn!(job_id = %self.job_id, "diagnostic capture failed: {}", e);
                None
            }
        }
    }

    async fn shutdown(&mut self) {
        if let Some(mut session) = self.session.take() {
            session.close().await;
        }
    }
}

async fn write_file(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(dir) = path.parent() {
        tokio::fs::create_dir_all(dir).await?;
    }
    tokio::fs::write(path, bytes).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filenames_are_filesystem_safe() {
        assert_eq!(
            entry_filename("In re: Acme Corp. (Ch. 11)", "45"),
            "In_re_Acme_Corp_Ch_11_45.pdf"
        );
        assert_eq!(entry_filename("", "7"), "entry_7.pdf");
        assert_eq!(entry_filename("../../etc/passwd", ""), "etc_passwd.pdf");
    }

    #[test]
    fn patterns_match_case_insensitively() {
        let patterns = compile_patterns(&[r"\btranscript\b".to_string(), "(".to_string()]);
        assert_eq!(patterns.len(), 1);
        assert_eq!(
            first_matching_pattern(&patterns, "TRANSCRIPT of hearing held 3/4"),
            Some(r"\btranscript\b".to_string())
        );
        assert!(first_matching_pattern(&patterns, "Motion to dismiss").is_none());
    }

    #[test]
    fn relative_links_resolve_against_page() {
        assert_eq!(
            CdpPortal::resolve_link(Some("https://portal.example.com/search?q=1"), "/doc/9"),
            "https://portal.example.com/doc/9"
        );
        assert_eq!(CdpPortal::resolve_link(None, "/doc/9"), "/doc/9");
    }

    #[test]
    fn script_literals_are_escaped() {
        assert_eq!(js(r#"a"b"#), r#""a\"b""#);
    }
}
