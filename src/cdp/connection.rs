//! CDP connection and session management
//!
//! `Connection` speaks browser-scope commands; `Session` is attached to one
//! page target and carries the page/network/emulation command set the
//! lifecycle engine needs.

use std::sync::Arc;

use super::transport::Transport;
use super::types::*;
use crate::error::Result;

/// A CDP connection to one browser process
pub struct Connection {
    transport: Arc<Transport>,
}

impl Connection {
    /// Wrap a connected transport
    pub fn new(transport: Transport) -> Self {
        Self {
            transport: Arc::new(transport),
        }
    }

    /// Get a reference to the transport
    pub fn transport(&self) -> &Arc<Transport> {
        &self.transport
    }

    /// Get browser version info. Doubles as the liveness probe: it is the
    /// cheapest command the browser answers on the browser-scope socket.
    pub async fn version(&self) -> Result<BrowserGetVersionResult> {
        self.transport
            .send("Browser.getVersion", &BrowserGetVersion {})
            .await
    }

    /// Create a new page target
    pub async fn create_target(&self, url: &str) -> Result<String> {
        let result: TargetCreateTargetResult = self
            .transport
            .send(
                "Target.createTarget",
                &TargetCreateTarget {
                    url: url.to_string(),
                    width: None,
                    height: None,
                },
            )
            .await?;
        Ok(result.target_id)
    }

    /// Attach to a target and get a session
    pub async fn attach_to_target(&self, target_id: &str) -> Result<Session> {
        let result: TargetAttachToTargetResult = self
            .transport
            .send(
                "Target.attachToTarget",
                &TargetAttachToTarget {
                    target_id: target_id.to_string(),
                    flatten: Some(true),
                },
            )
            .await?;

        Ok(Session {
            transport: Arc::clone(&self.transport),
            session_id: result.session_id,
            target_id: target_id.to_string(),
        })
    }

    /// List all targets
    pub async fn targets(&self) -> Result<Vec<TargetInfo>> {
        let result: TargetGetTargetsResult = self
            .transport
            .send("Target.getTargets", &TargetGetTargets {})
            .await?;
        Ok(result.target_infos)
    }

    /// Count of open page targets. Zero pages left means the user closed
    /// the last window, which is a termination path in its own right.
    pub async fn open_page_count(&self) -> Result<usize> {
        let targets = self.targets().await?;
        Ok(targets.iter().filter(|t| t.r#type == "page").count())
    }

    /// Subscribe to target created/destroyed events
    pub async fn set_discover_targets(&self, discover: bool) -> Result<()> {
        self.transport
            .send::<_, serde_json::Value>(
                "Target.setDiscoverTargets",
                &TargetSetDiscoverTargets { discover },
            )
            .await?;
        Ok(())
    }

    /// Close the browser: polite `Browser.close`, then kill the process
    pub async fn close(&self) -> Result<()> {
        let _ = self
            .transport
            .send::<_, serde_json::Value>("Browser.close", &BrowserClose {})
            .await;
        self.transport.close().await
    }
}

/// A CDP session attached to a specific page target
pub struct Session {
    transport: Arc<Transport>,
    session_id: String,
    target_id: String,
}

impl Session {
    /// Get the session ID
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Get the target ID
    pub fn target_id(&self) -> &str {
        &self.target_id
    }

    /// Send a command to this session
    pub async fn send<C, R>(&self, method: &str, params: &C) -> Result<R>
    where
        C: serde::Serialize,
        R: serde::de::DeserializeOwned,
    {
        self.transport
            .send_to_session(&self.session_id, method, params)
            .await
    }

    /// Enable page lifecycle events
    pub async fn page_enable(&self) -> Result<()> {
        self.send::<_, serde_json::Value>("Page.enable", &PageEnable {})
            .await?;
        Ok(())
    }

    /// Enable network events (request failure diagnostics)
    pub async fn network_enable(&self) -> Result<()> {
        self.send::<_, serde_json::Value>(
            "Network.enable",
            &NetworkEnable {
                max_post_data_size: None,
            },
        )
        .await?;
        Ok(())
    }

    /// Enable browser log entries (top-level script errors arrive here;
    /// the Runtime domain stays off because enabling it is detectable)
    pub async fn log_enable(&self) -> Result<()> {
        self.send::<_, serde_json::Value>("Log.enable", &LogEnable {})
            .await?;
        Ok(())
    }

    /// Navigate to a URL
    pub async fn navigate(&self, url: &str) -> Result<PageNavigateResult> {
        self.send(
            "Page.navigate",
            &PageNavigate {
                url: url.to_string(),
            },
        )
        .await
    }

    /// Reload the page
    pub async fn reload(&self, ignore_cache: bool) -> Result<()> {
        self.send::<_, serde_json::Value>(
            "Page.reload",
            &PageReload {
                ignore_cache: Some(ignore_cache),
            },
        )
        .await?;
        Ok(())
    }

    /// Register a script that runs in every new document before any page
    /// script executes, including reloads and sub-frame navigations
    pub async fn add_script_to_evaluate_on_new_document(&self, source: &str) -> Result<String> {
        let result: PageAddScriptToEvaluateOnNewDocumentResult = self
            .send(
                "Page.addScriptToEvaluateOnNewDocument",
                &PageAddScriptToEvaluateOnNewDocument {
                    source: source.to_string(),
                },
            )
            .await?;
        Ok(result.identifier)
    }

    /// Evaluate a JavaScript expression and return the result by value
    pub async fn evaluate(&self, expression: &str) -> Result<RuntimeEvaluateResult> {
        self.send(
            "Runtime.evaluate",
            &RuntimeEvaluate {
                expression: expression.to_string(),
                return_by_value: Some(true),
                await_promise: Some(true),
            },
        )
        .await
    }

    /// Get the frame tree (current URL lives on the root frame)
    pub async fn frame_tree(&self) -> Result<FrameTree> {
        let result: PageGetFrameTreeResult =
            self.send("Page.getFrameTree", &PageGetFrameTree {}).await?;
        Ok(result.frame_tree)
    }

    /// Get all cookies visible to this page
    pub async fn cookies(&self) -> Result<Vec<Cookie>> {
        let result: NetworkGetCookiesResult = self
            .send("Network.getCookies", &NetworkGetCookies { urls: None })
            .await?;
        Ok(result.cookies)
    }

    /// Write a batch of cookies back into the browser
    pub async fn set_cookies(&self, cookies: Vec<CookieParam>) -> Result<()> {
        self.send::<_, serde_json::Value>("Network.setCookies", &NetworkSetCookies { cookies })
            .await?;
        Ok(())
    }

    /// Override the real User-Agent string at the network layer
    pub async fn set_user_agent(
        &self,
        user_agent: &str,
        accept_language: Option<&str>,
        platform: Option<&str>,
    ) -> Result<()> {
        self.send::<_, serde_json::Value>(
            "Emulation.setUserAgentOverride",
            &EmulationSetUserAgentOverride {
                user_agent: user_agent.to_string(),
                accept_language: accept_language.map(String::from),
                platform: platform.map(String::from),
            },
        )
        .await?;
        Ok(())
    }

    /// Override the real page viewport
    pub async fn set_viewport(&self, width: u32, height: u32) -> Result<()> {
        self.send::<_, serde_json::Value>(
            "Emulation.setDeviceMetricsOverride",
            &EmulationSetDeviceMetricsOverride {
                width,
                height,
                device_scale_factor: 1.0,
                mobile: false,
            },
        )
        .await?;
        Ok(())
    }

    /// Pin geolocation to a fixed coordinate
    pub async fn set_geolocation(
        &self,
        latitude: f64,
        longitude: f64,
        accuracy: f64,
    ) -> Result<()> {
        self.send::<_, serde_json::Value>(
            "Emulation.setGeolocationOverride",
            &EmulationSetGeolocationOverride {
                latitude: Some(latitude),
                longitude: Some(longitude),
                accuracy: Some(accuracy),
            },
        )
        .await?;
        Ok(())
    }

    /// Capture a screenshot
    pub async fn capture_screenshot(
        &self,
        format: Option<&str>,
        quality: Option<u8>,
    ) -> Result<Vec<u8>> {
        let result: PageCaptureScreenshotResult = self
            .send(
                "Page.captureScreenshot",
                &PageCaptureScreenshot {
                    format: format.map(String::from),
                    quality,
                },
            )
            .await?;

        use base64::Engine;
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(&result.data)
            .map_err(|e| crate::error::Error::Decode(e.to_string()))?;
        Ok(bytes)
    }
}
