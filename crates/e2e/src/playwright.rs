//! Playwright browser automation
//!
//! Every driver call renders a small Node script, runs it, and reads one
//! JSON line back. Continuity between calls comes from two things kept by
//! the context: the Playwright `storageState` file (cookies, local storage)
//! and a replay journal of the last navigation plus the in-page actions
//! performed since, which is re-applied before each new action.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::time::Duration;
use tokio::process::Command as TokioCommand;
use tracing::{debug, warn};

use crate::driver::{BrowserDriver, BrowserLauncher};
use crate::error::{E2eError, E2eResult};

/// Extra wall-clock allowance for starting node and the browser
const LAUNCH_OVERHEAD: Duration = Duration::from_secs(20);

const EMPTY_STATE: &str = r#"{"cookies":[],"origins":[]}"#;

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Browser {
    #[default]
    Chromium,
    Firefox,
    Webkit,
}

impl Browser {
    fn as_str(&self) -> &'static str {
        match self {
            Browser::Chromium => "chromium",
            Browser::Firefox => "firefox",
            Browser::Webkit => "webkit",
        }
    }
}

/// Configuration for Playwright
#[derive(Debug, Clone)]
pub struct PlaywrightConfig {
    pub viewport_width: u32,
    pub viewport_height: u32,
    pub browser: Browser,
    pub headless: bool,
    pub node_binary: PathBuf,
}

impl Default for PlaywrightConfig {
    fn default() -> Self {
        Self {
            viewport_width: 1280,
            viewport_height: 720,
            browser: Browser::Chromium,
            headless: true,
            node_binary: PathBuf::from("node"),
        }
    }
}

/// Shape of a Playwright storage state file. Only used for validation;
/// the blob itself is passed through untouched.
#[derive(Debug, Deserialize)]
struct StorageState {
    #[allow(dead_code)]
    cookies: Vec<serde_json::Value>,
    #[allow(dead_code)]
    origins: Vec<serde_json::Value>,
}

/// Check that a blob is a usable Playwright storage state
pub fn validate_storage_state(blob: &[u8]) -> E2eResult<()> {
    serde_json::from_slice::<StorageState>(blob)
        .map(|_| ())
        .map_err(|e| E2eError::StateCorruption {
            location: "storage state blob".to_string(),
            reason: e.to_string(),
        })
}

/// Launches Playwright-backed contexts
#[derive(Debug, Clone)]
pub struct PlaywrightLauncher {
    config: PlaywrightConfig,
}

impl PlaywrightLauncher {
    pub fn new(config: PlaywrightConfig) -> E2eResult<Self> {
        Self::check_playwright_installed()?;
        Ok(Self { config })
    }

    /// Check if Playwright is installed
    fn check_playwright_installed() -> E2eResult<()> {
        let output = Command::new("npx")
            .args(["playwright", "--version"])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();

        match output {
            Ok(status) if status.success() => Ok(()),
            _ => Err(E2eError::PlaywrightNotFound),
        }
    }
}

#[async_trait]
impl BrowserLauncher for PlaywrightLauncher {
    async fn launch(&self, state: Option<&[u8]>) -> E2eResult<Box<dyn BrowserDriver>> {
        let workdir = tempfile::tempdir()?;
        if let Some(blob) = state {
            validate_storage_state(blob)?;
            tokio::fs::write(workdir.path().join("state.json"), blob).await?;
        }
        debug!("Launched Playwright context in {}", workdir.path().display());

        Ok(Box::new(PlaywrightContext {
            config: self.config.clone(),
            workdir,
            current_url: None,
            journal: Vec::new(),
        }))
    }
}

/// A Playwright browsing context
pub struct PlaywrightContext {
    config: PlaywrightConfig,
    workdir: tempfile::TempDir,
    current_url: Option<String>,
    /// In-page actions since the last navigation
    journal: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct ScriptOutcome {
    success: bool,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    status: Option<u16>,
    #[serde(default)]
    error: Option<String>,
}

impl PlaywrightContext {
    fn state_path(&self) -> PathBuf {
        self.workdir.path().join("state.json")
    }

    /// Build the Playwright script that replays the journal and runs `action`
    fn build_script(&self, action: &str, timeout: Duration) -> String {
        let mut script = String::new();

        script.push_str(&format!(
            r#"
const {{ chromium, firefox, webkit }} = require('playwright');
const fs = require('fs');

(async () => {{
  const browser = await {browser}.launch({{ headless: {headless} }});
  const statePath = {state_path};
  const context = await browser.newContext({{
    viewport: {{ width: {width}, height: {height} }},
    ...(fs.existsSync(statePath) ? {{ storageState: statePath }} : {{}})
  }});
  const page = await context.newPage();
  page.setDefaultTimeout({timeout_ms});
  let status = null;

  try {{
"#,
            browser = self.config.browser.as_str(),
            headless = self.config.headless,
            state_path = js_str(&self.state_path().to_string_lossy()),
            width = self.config.viewport_width,
            height = self.config.viewport_height,
            timeout_ms = timeout.as_millis(),
        ));

        if let Some(url) = &self.current_url {
            script.push_str(&format!("    await page.goto({});\n", js_str(url)));
        }
        for replay in &self.journal {
            script.push_str(replay);
            script.push('\n');
        }
        script.push_str(action);
        script.push('\n');

        script.push_str(
            r#"
    await context.storageState({ path: statePath });
    console.log(JSON.stringify({ success: true, url: page.url(), status }));
  } catch (error) {
    console.log(JSON.stringify({ success: false, error: error.message }));
    process.exitCode = 1;
  } finally {
    await browser.close();
  }
})();
"#,
        );

        script
    }

    /// Execute the script via node and parse its result line
    async fn run_script(
        &self,
        what: &str,
        script: &str,
        timeout: Duration,
    ) -> E2eResult<ScriptOutcome> {
        let script_path = self.workdir.path().join("step.js");
        tokio::fs::write(&script_path, script).await?;

        debug!("Running Playwright script for {}", what);

        let child = TokioCommand::new(&self.config.node_binary)
            .arg(&script_path)
            .current_dir(self.workdir.path())
            .kill_on_drop(true)
            .output();

        let output = tokio::time::timeout(timeout + LAUNCH_OVERHEAD, child)
            .await
            .map_err(|_| E2eError::Timeout {
                what: what.to_string(),
                after_ms: timeout.as_millis() as u64,
            })??;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let line = stdout.lines().rev().find(|l| l.trim_start().starts_with('{'));

        match line.map(serde_json::from_str::<ScriptOutcome>) {
            Some(Ok(outcome)) if outcome.success => Ok(outcome),
            Some(Ok(outcome)) => Err(E2eError::Playwright(format!(
                "{} failed: {}",
                what,
                outcome.error.unwrap_or_else(|| "unknown error".to_string())
            ))),
            _ => {
                let stderr = String::from_utf8_lossy(&output.stderr);
                Err(E2eError::Playwright(format!(
                    "Script failed:\nstdout: {}\nstderr: {}",
                    stdout, stderr
                )))
            }
        }
    }

    /// Run an in-page action, keeping it in the journal while the URL holds
    async fn page_action(
        &mut self,
        what: &str,
        action: String,
        timeout: Duration,
    ) -> E2eResult<ScriptOutcome> {
        let script = self.build_script(&action, timeout);
        let outcome = self.run_script(what, &script, timeout).await?;

        match &outcome.url {
            Some(url) if Some(url) != self.current_url.as_ref() => {
                self.current_url = Some(url.clone());
                self.journal.clear();
            }
            _ => self.journal.push(action),
        }
        Ok(outcome)
    }
}

#[async_trait]
impl BrowserDriver for PlaywrightContext {
    async fn navigate(&mut self, url: &str, timeout: Duration) -> E2eResult<()> {
        self.current_url = None;
        self.journal.clear();

        let action = format!("    await page.goto({});", js_str(url));
        let script = self.build_script(&action, timeout);
        let outcome = self.run_script(&format!("navigate:{}", url), &script, timeout).await?;

        self.current_url = outcome.url.or_else(|| Some(url.to_string()));
        Ok(())
    }

    async fn wait_for_element(&mut self, selector: &str, timeout: Duration) -> E2eResult<()> {
        let action = format!(
            "    await page.waitForSelector({}, {{ state: 'visible', timeout: {} }});",
            js_str(selector),
            timeout.as_millis()
        );
        let script = self.build_script(&action, timeout);
        self.run_script(&format!("wait:{}", selector), &script, timeout)
            .await
            .map(|_| ())
    }

    async fn click(&mut self, selector: &str, timeout: Duration) -> E2eResult<()> {
        let action = format!(
            "    await page.click({}, {{ timeout: {} }});\n    await page.waitForLoadState();",
            js_str(selector),
            timeout.as_millis()
        );
        self.page_action(&format!("click:{}", selector), action, timeout)
            .await
            .map(|_| ())
    }

    async fn fill(&mut self, selector: &str, value: &str, timeout: Duration) -> E2eResult<()> {
        let action = format!(
            "    await page.fill({}, {}, {{ timeout: {} }});",
            js_str(selector),
            js_str(value),
            timeout.as_millis()
        );
        self.page_action(&format!("fill:{}", selector), action, timeout)
            .await
            .map(|_| ())
    }

    async fn fetch(&mut self, url: &str, method: &str, timeout: Duration) -> E2eResult<u16> {
        let action = format!(
            concat!(
                "    const resp = await context.request.fetch(\n",
                "        {}, {{ method: {}, timeout: {} }});\n",
                "    status = resp.status();"
            ),
            js_str(url),
            js_str(method),
            timeout.as_millis()
        );
        let script = self.build_script(&action, timeout);
        let outcome = self
            .run_script(&format!("fetch:{} {}", method, url), &script, timeout)
            .await?;

        outcome
            .status
            .ok_or_else(|| E2eError::Playwright(format!("fetch {} returned no status", url)))
    }

    async fn save_state(&mut self) -> E2eResult<Vec<u8>> {
        match tokio::fs::read(self.state_path()).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Ok(EMPTY_STATE.as_bytes().to_vec())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn close(&mut self) -> E2eResult<()> {
        // Browsers are closed at the end of every script; only the journal
        // and working files remain.
        self.current_url = None;
        self.journal.clear();
        if let Err(e) = tokio::fs::remove_file(self.workdir.path().join("step.js")).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("Failed to remove Playwright script: {}", e);
            }
        }
        Ok(())
    }
}

/// Quote a string as a JavaScript literal
fn js_str(s: &str) -> String {
    serde_json::Value::String(s.to_string()).to_string()
}
