use std::sync::Arc;
use std::time::Duration;

use chromiumoxide::browser::{Browser, BrowserConfig as ChromiumConfig};
use chromiumoxide::cdp::browser_protocol::network::SetUserAgentOverrideParams;
use chromiumoxide::cdp::browser_protocol::page::{
    AddScriptToEvaluateOnNewDocumentParams, NavigateParams,
};
use chromiumoxide::cdp::browser_protocol::target::CreateTargetParams;
use chromiumoxide::element::Element;
use chromiumoxide::handler::viewport::Viewport as ChromiumViewport;
use chromiumoxide::page::{Page, ScreenshotParams};
use futures::StreamExt;
use rand::{seq::SliceRandom, Rng};
use serde::de::DeserializeOwned;
use tempfile::TempDir;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

use crate::config::BrowserConfig;

use super::error::{BrowserError, BrowserResult};

#[derive(Debug, Clone)]
pub struct ViewportSpec {
    pub width: u32,
    pub height: u32,
    pub device_scale_factor: f64,
}

/// Per-launch tweaks layered over `browser.toml`. The CLI maps `--headed`
/// onto `headless` so a debugging batch runs with a visible window.
#[derive(Debug, Clone, Default)]
pub struct LaunchOverrides {
    pub headless: Option<bool>,
}

/// Launches Chromium instances with a randomized fingerprint per session.
/// Each launch gets a throwaway profile directory so no cookies or storage
/// leak between batches.
#[derive(Debug, Clone)]
pub struct BrowserLauncher {
    config: Arc<BrowserConfig>,
}

impl BrowserLauncher {
    pub fn new(config: BrowserConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &BrowserConfig {
        &self.config
    }

    pub async fn launch(&self, overrides: LaunchOverrides) -> BrowserResult<BrowserSession> {
        let profile_dir = TempDir::new()?;
        let viewport = self.select_viewport();
        let user_agent = self.select_user_agent();
        let headless = overrides.headless.unwrap_or(self.config.chromium.headless);
        let chromium_config =
            self.build_chromium_config(&profile_dir, &viewport, &user_agent, headless)?;
        info!(
            ua = %user_agent,
            width = viewport.width,
            height = viewport.height,
            headless,
            "launching chromium instance"
        );

        let (browser, mut handler) = Browser::launch(chromium_config)
            .await
            .map_err(|err| BrowserError::Launch(err.to_string()))?;

        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(err) = event {
                    debug!(error = %err, "chromium handler event error");
                }
            }
        });

        Ok(BrowserSession {
            browser,
            handler_task: Some(handler_task),
            config: Arc::clone(&self.config),
            viewport,
            user_agent,
            _profile_dir: profile_dir,
        })
    }

    /// Picks a base resolution from the pool and jitters it so two sessions
    /// rarely share an exact window size.
    fn select_viewport(&self) -> ViewportSpec {
        let section = &self.config.viewport;
        let mut rng = rand::thread_rng();
        let [base_width, base_height] = section
            .resolutions
            .choose(&mut rng)
            .copied()
            .unwrap_or([1440, 900]);
        let spread = section.jitter_pixels as i32;
        let mut jittered = |base: u32, floor: i32, ceiling: i32| {
            (base as i32 + rng.gen_range(-spread..=spread)).clamp(floor, ceiling) as u32
        };
        let width = jittered(base_width, 640, 2560);
        let height = jittered(base_height, 480, 1600);
        let [scale_low, scale_high] = section.device_scale_factor;
        ViewportSpec {
            width,
            height,
            device_scale_factor: rng.gen_range(scale_low..=scale_high) as f64,
        }
    }

    fn select_user_agent(&self) -> String {
        self.config
            .user_agents
            .pool
            .choose(&mut rand::thread_rng())
            .cloned()
            .unwrap_or_else(|| FALLBACK_USER_AGENT.to_string())
    }

    fn build_chromium_config(
        &self,
        profile_dir: &TempDir,
        viewport: &ViewportSpec,
        user_agent: &str,
        headless: bool,
    ) -> BrowserResult<ChromiumConfig> {
        let flags = &self.config.flags;

        let mut args = vec![
            format!("--user-agent={user_agent}"),
            format!("--window-size={},{}", viewport.width, viewport.height),
            "--disable-background-timer-throttling".to_string(),
            "--password-store=basic".to_string(),
        ];
        args.extend(
            flags
                .disable_blink_features
                .iter()
                .map(|feature| format!("--disable-blink-features={feature}")),
        );
        if self.config.chromium.disable_gpu {
            args.push("--disable-gpu".into());
        }
        if flags.mute_audio {
            args.push("--mute-audio".into());
        }
        if flags.no_first_run {
            args.push("--no-first-run".into());
        }
        if flags.disable_automation_controlled {
            args.push("--disable-features=AutomationControlled".into());
        }
        if let Some(lang) = &flags.lang {
            args.push(format!("--lang={lang}"));
        }
        if let Some(accept) = &flags.accept_language {
            args.push(format!("--accept-lang={accept}"));
        }

        let mut builder = ChromiumConfig::builder()
            .chrome_executable(&self.config.chromium.executable_path)
            .user_data_dir(profile_dir.path())
            .viewport(ChromiumViewport {
                width: viewport.width,
                height: viewport.height,
                device_scale_factor: Some(viewport.device_scale_factor),
                is_landscape: viewport.height <= viewport.width,
                emulating_mobile: false,
                has_touch: false,
            })
            .args(args);
        if !headless {
            builder = builder.with_head();
        }
        if !self.config.chromium.sandbox {
            builder = builder.no_sandbox();
        }
        builder.build().map_err(BrowserError::Configuration)
    }
}

/// A live Chromium instance plus the task draining its event handler.
#[derive(Debug)]
pub struct BrowserSession {
    browser: Browser,
    handler_task: Option<JoinHandle<()>>,
    config: Arc<BrowserConfig>,
    viewport: ViewportSpec,
    user_agent: String,
    _profile_dir: TempDir,
}

impl BrowserSession {
    pub fn viewport(&self) -> &ViewportSpec {
        &self.viewport
    }

    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }

    pub fn config(&self) -> &BrowserConfig {
        &self.config
    }

    /// Opens a fresh tab with the stealth overrides applied.
    pub async fn new_page(&self) -> BrowserResult<PageSession> {
        let params = CreateTargetParams::new("about:blank");
        let page = self.browser.new_page(params).await?;
        self.configure_page(&page).await?;
        Ok(PageSession {
            page,
            config: Arc::clone(&self.config),
        })
    }

    pub async fn shutdown(mut self) -> BrowserResult<()> {
        info!("shutting down chromium instance");
        if let Err(err) = self.browser.close().await {
            warn!(error = %err, "failed to close browser gracefully");
        }
        if let Some(handle) = self.handler_task.take() {
            if let Err(err) = handle.await {
                warn!(error = %err, "browser handler join error");
            }
        }
        Ok(())
    }

    async fn configure_page(&self, page: &Page) -> BrowserResult<()> {
        page.enable_stealth_mode_with_agent(&self.user_agent)
            .await?;

        let mut ua_override = SetUserAgentOverrideParams::builder();
        ua_override = ua_override.user_agent(self.user_agent.clone());
        if let Some(accept) = &self.config.flags.accept_language {
            ua_override = ua_override.accept_language(accept.clone());
        }
        page.set_user_agent(ua_override.build().map_err(BrowserError::Configuration)?)
            .await?;

        let mask = AddScriptToEvaluateOnNewDocumentParams::builder()
            .source(WEBDRIVER_MASK_SCRIPT)
            .build()
            .map_err(BrowserError::Configuration)?;
        page.evaluate_on_new_document(mask).await?;
        Ok(())
    }
}

impl Drop for BrowserSession {
    fn drop(&mut self) {
        if let Some(handle) = &self.handler_task {
            if !handle.is_finished() {
                warn!("BrowserSession dropped without explicit shutdown");
            }
        }
    }
}

/// One tab. All page access in the apply loop funnels through here so
/// navigation timeouts and settle pauses stay consistent.
#[derive(Debug)]
pub struct PageSession {
    page: Page,
    config: Arc<BrowserConfig>,
}

impl PageSession {
    pub fn page(&self) -> &Page {
        &self.page
    }

    /// Navigates and waits for the page to settle. A navigation that outlives
    /// `navigation.page_load_timeout_ms` is reported as
    /// [`BrowserError::Timeout`].
    pub async fn goto(&self, url: &str) -> BrowserResult<()> {
        let params = NavigateParams::builder()
            .url(url)
            .build()
            .map_err(BrowserError::Configuration)?;
        let deadline = Duration::from_millis(self.config.navigation.page_load_timeout_ms);
        let navigation = async {
            self.page.goto(params).await?;
            self.page.wait_for_navigation().await?;
            Ok::<(), BrowserError>(())
        };
        match timeout(deadline, navigation).await {
            Ok(result) => result?,
            Err(_) => return Err(BrowserError::Timeout(format!("navigation to {url}"))),
        }
        self.settle().await;
        Ok(())
    }

    pub async fn reload(&self) -> BrowserResult<()> {
        let deadline = Duration::from_millis(self.config.navigation.page_load_timeout_ms);
        match timeout(deadline, self.page.reload()).await {
            Ok(result) => {
                result?;
            }
            Err(_) => return Err(BrowserError::Timeout("page reload".into())),
        }
        self.settle().await;
        Ok(())
    }

    pub async fn current_url(&self) -> BrowserResult<String> {
        Ok(self
            .page
            .url()
            .await?
            .unwrap_or_else(|| "about:blank".to_string()))
    }

    pub async fn content(&self) -> BrowserResult<String> {
        Ok(self.page.content().await?)
    }

    /// Viewport screenshot as PNG bytes, the form the vision models accept.
    pub async fn screenshot_png(&self) -> BrowserResult<Vec<u8>> {
        let params = ScreenshotParams::builder().build();
        Ok(self.page.screenshot(params).await?)
    }

    /// Evaluates `script` and deserializes its return value.
    pub async fn evaluate<T: DeserializeOwned>(&self, script: &str) -> BrowserResult<T> {
        self.page
            .evaluate(script)
            .await
            .map_err(|err| BrowserError::Unexpected(format!("script evaluation failed: {err}")))?
            .into_value()
            .map_err(|err| {
                BrowserError::Unexpected(format!("script result deserialization failed: {err}"))
            })
    }

    pub async fn find_element(&self, selector: &str) -> BrowserResult<Element> {
        self.page
            .find_element(selector)
            .await
            .map_err(|_| BrowserError::ElementNotFound(selector.to_string()))
    }

    /// First match from a list of candidate selectors.
    pub async fn find_first(&self, selectors: &[&str]) -> Option<Element> {
        for selector in selectors {
            if let Ok(element) = self.page.find_element(*selector).await {
                return Some(element);
            }
        }
        None
    }

    async fn settle(&self) {
        let bounds = self.config.navigation.settle_delay_ms;
        let ms = rand::thread_rng().gen_range(bounds[0]..=bounds[1]) as u64;
        sleep(Duration::from_millis(ms)).await;
    }
}

const FALLBACK_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

const WEBDRIVER_MASK_SCRIPT: &str = r#"
(() => {
    Object.defineProperty(navigator, 'webdriver', { get: () => undefined });
    if (!window.chrome) {
        window.chrome = { runtime: {} };
    }
    Object.defineProperty(navigator, 'plugins', {
        get: () => [1, 2, 3, 4, 5],
    });
})();
"#;
