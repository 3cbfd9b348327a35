//! Page abstraction
//!
//! A thin handle over the primary page's CDP session: navigation, typed
//! evaluation, cookie/storage access, screenshots. Deliberately no element
//! interaction surface; this crate manages instances, it does not script
//! them.

use std::collections::BTreeMap;

use crate::cdp::{Cookie, CookieParam, Session};
use crate::error::{Error, Result};

const LOCAL_STORAGE_SNAPSHOT: &str = r#"
(() => {
    const items = {};
    for (let i = 0; i < localStorage.length; i++) {
        const key = localStorage.key(i);
        items[key] = localStorage.getItem(key);
    }
    return items;
})()
"#;

const SESSION_STORAGE_SNAPSHOT: &str = r#"
(() => {
    const items = {};
    for (let i = 0; i < sessionStorage.length; i++) {
        const key = sessionStorage.key(i);
        items[key] = sessionStorage.getItem(key);
    }
    return items;
})()
"#;

/// A managed browser page
pub struct Page {
    session: Session,
}

impl Page {
    pub(crate) fn new(session: Session) -> Self {
        Self { session }
    }

    /// Get the underlying CDP session
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Target ID of the page this handle is attached to
    pub fn target_id(&self) -> &str {
        self.session.target_id()
    }

    /// Navigate to a URL
    pub async fn goto(&self, url: &str) -> Result<()> {
        let result = self.session.navigate(url).await?;
        if let Some(error) = result.error_text {
            return Err(Error::Navigation(error));
        }
        Ok(())
    }

    /// Reload the page
    pub async fn reload(&self) -> Result<()> {
        self.session.reload(false).await
    }

    /// Wait until the document is fully loaded (readyState === "complete"),
    /// polling because the Runtime events that would push this are kept off
    pub async fn wait_for_navigation(&self, timeout_ms: u64) -> Result<()> {
        let start = std::time::Instant::now();
        let timeout = std::time::Duration::from_millis(timeout_ms);
        let poll_interval = std::time::Duration::from_millis(50);

        loop {
            if let Ok(result) = self.session.evaluate("document.readyState").await {
                if let Some(value) = result.result.value {
                    if value.as_str() == Some("complete") {
                        return Ok(());
                    }
                }
            }

            if start.elapsed() > timeout {
                return Err(Error::Timeout(format!(
                    "Navigation did not complete within {}ms",
                    timeout_ms
                )));
            }

            tokio::time::sleep(poll_interval).await;
        }
    }

    /// Get current URL
    pub async fn url(&self) -> Result<String> {
        let frame_tree = self.session.frame_tree().await?;
        Ok(frame_tree.frame.url)
    }

    /// Get page title
    pub async fn title(&self) -> Result<String> {
        let result = self.session.evaluate("document.title").await?;
        Ok(result
            .result
            .value
            .and_then(|v| v.as_str().map(String::from))
            .unwrap_or_default())
    }

    /// Evaluate a JavaScript expression and deserialize its value
    pub async fn evaluate<T: serde::de::DeserializeOwned>(&self, expression: &str) -> Result<T> {
        let result = self.session.evaluate(expression).await?;
        if let Some(details) = result.exception_details {
            return Err(Error::cdp("Runtime.evaluate", -1, details.text));
        }
        let value = result.result.value.unwrap_or(serde_json::Value::Null);
        Ok(serde_json::from_value(value)?)
    }

    /// True if the page can currently run script (not mid-navigation or
    /// torn down)
    pub async fn is_evaluable(&self) -> bool {
        self.evaluate::<String>("document.readyState").await.is_ok()
    }

    /// All cookies visible to this page. Read through the network layer,
    /// so it works even when script execution does not.
    pub async fn cookies(&self) -> Result<Vec<Cookie>> {
        self.session.cookies().await
    }

    /// Write cookies back into the browser
    pub async fn set_cookies(&self, cookies: Vec<CookieParam>) -> Result<()> {
        self.session.set_cookies(cookies).await
    }

    /// Snapshot of localStorage as a key/value map
    pub async fn local_storage(&self) -> Result<BTreeMap<String, String>> {
        self.evaluate(LOCAL_STORAGE_SNAPSHOT).await
    }

    /// Snapshot of sessionStorage as a key/value map
    pub async fn session_storage(&self) -> Result<BTreeMap<String, String>> {
        self.evaluate(SESSION_STORAGE_SNAPSHOT).await
    }

    /// Replace a storage area's contents with the given entries
    async fn restore_storage(
        &self,
        area: &str,
        entries: &BTreeMap<String, String>,
    ) -> Result<()> {
        let data = serde_json::to_string(entries)?;
        let script = format!(
            r#"
(() => {{
    const data = {data};
    {area}.clear();
    for (const [key, value] of Object.entries(data)) {{
        {area}.setItem(key, value);
    }}
    return {area}.length;
}})()
"#,
        );
        self.evaluate::<i64>(&script).await?;
        Ok(())
    }

    /// Replace localStorage contents
    pub async fn restore_local_storage(&self, entries: &BTreeMap<String, String>) -> Result<()> {
        self.restore_storage("localStorage", entries).await
    }

    /// Replace sessionStorage contents
    pub async fn restore_session_storage(
        &self,
        entries: &BTreeMap<String, String>,
    ) -> Result<()> {
        self.restore_storage("sessionStorage", entries).await
    }

    /// Capture a screenshot as PNG bytes
    pub async fn screenshot(&self) -> Result<Vec<u8>> {
        self.session.capture_screenshot(Some("png"), None).await
    }
}
