//! Integration tests for rookery
//!
//! These tests require Chrome to be installed and available.
//! Run with: cargo test --test integration -- --ignored

use rookery::cdp::CookieParam;
use rookery::{
    BrowserManager, FingerprintProfile, InstanceStatus, LaunchOptions, NavigatorProfile,
    ScreenProfile,
};

/// Check if Chrome is available
fn chrome_available() -> bool {
    rookery::launcher::find_chrome().is_ok()
}

fn test_fingerprint() -> FingerprintProfile {
    FingerprintProfile {
        navigator: Some(NavigatorProfile {
            user_agent: "X".to_string(),
            platform: "MacIntel".to_string(),
            language: "en-US".to_string(),
            languages: vec!["en-US".to_string(), "en".to_string()],
            hardware_concurrency: 8,
            device_memory: 8,
        }),
        screen: Some(ScreenProfile {
            width: 1280,
            height: 800,
            color_depth: 24,
            pixel_depth: 24,
        }),
        ..Default::default()
    }
}

#[tokio::test]
#[ignore = "requires Chrome"]
async fn launch_registers_one_running_instance() {
    if !chrome_available() {
        eprintln!("Chrome not found, skipping test");
        return;
    }

    let root = tempfile::tempdir().expect("tempdir");
    let manager = BrowserManager::new(root.path());

    let info = manager
        .launch("acct-1", LaunchOptions::default(), None)
        .await
        .expect("Failed to launch");
    assert_eq!(info.name, "acct-1");
    assert_eq!(info.status, InstanceStatus::Running);

    assert!(manager.is_running("acct-1").await);
    assert_eq!(manager.status("acct-1"), InstanceStatus::Running);
    assert_eq!(manager.statuses().len(), 1);

    manager.stop("acct-1").await.expect("Failed to stop");
    assert!(!manager.is_running("acct-1").await);
}

#[tokio::test]
#[ignore = "requires Chrome"]
async fn second_launch_for_live_name_fails_and_leaves_it_untouched() {
    if !chrome_available() {
        eprintln!("Chrome not found, skipping test");
        return;
    }

    let root = tempfile::tempdir().expect("tempdir");
    let manager = BrowserManager::new(root.path());

    manager
        .launch("acct-1", LaunchOptions::default(), None)
        .await
        .expect("Failed to launch");

    let second = manager
        .launch("acct-1", LaunchOptions::default(), None)
        .await;
    assert!(matches!(
        second,
        Err(rookery::Error::AlreadyRunning(name)) if name == "acct-1"
    ));

    // The existing instance is untouched
    assert!(manager.is_running("acct-1").await);

    manager.stop("acct-1").await.expect("Failed to stop");
}

#[tokio::test]
#[ignore = "requires Chrome"]
async fn stop_twice_is_equivalent_to_stop_once() {
    if !chrome_available() {
        eprintln!("Chrome not found, skipping test");
        return;
    }

    let root = tempfile::tempdir().expect("tempdir");
    let manager = BrowserManager::new(root.path());

    manager
        .launch("acct-1", LaunchOptions::default(), None)
        .await
        .expect("Failed to launch");

    manager.stop("acct-1").await.expect("First stop failed");
    manager.stop("acct-1").await.expect("Second stop must be a no-op");
    assert!(!manager.is_running("acct-1").await);
}

#[tokio::test]
#[ignore = "requires Chrome"]
async fn relaunch_after_stop_creates_a_fresh_instance() {
    if !chrome_available() {
        eprintln!("Chrome not found, skipping test");
        return;
    }

    let root = tempfile::tempdir().expect("tempdir");
    let manager = BrowserManager::new(root.path());

    manager
        .launch("acct-1", LaunchOptions::default(), None)
        .await
        .expect("Failed to launch");
    manager.stop("acct-1").await.expect("Failed to stop");

    manager
        .launch("acct-1", LaunchOptions::default(), None)
        .await
        .expect("Relaunch under the same name must be admitted");
    assert!(manager.is_running("acct-1").await);

    manager.stop("acct-1").await.expect("Failed to stop");
}

#[tokio::test]
#[ignore = "requires Chrome"]
async fn fingerprint_is_visible_inside_the_document() {
    if !chrome_available() {
        eprintln!("Chrome not found, skipping test");
        return;
    }

    let root = tempfile::tempdir().expect("tempdir");
    let manager = BrowserManager::new(root.path());

    manager
        .launch(
            "profile1",
            LaunchOptions::default(),
            Some(test_fingerprint()),
        )
        .await
        .expect("Failed to launch");

    let page = manager.page("profile1").expect("page handle");
    page.goto("data:text/html,<h1>fingerprint</h1>")
        .await
        .expect("Failed to navigate");
    page.wait_for_navigation(10_000).await.expect("load");

    let user_agent: String = page
        .evaluate("navigator.userAgent")
        .await
        .expect("evaluate userAgent");
    assert_eq!(user_agent, "X");

    let width: u32 = page.evaluate("screen.width").await.expect("evaluate width");
    assert_eq!(width, 1280);

    let webdriver: bool = page
        .evaluate("navigator.webdriver === false || navigator.webdriver === undefined")
        .await
        .expect("evaluate webdriver");
    assert!(webdriver);

    // The injection survives a reload: it runs in every new document
    page.reload().await.expect("reload");
    page.wait_for_navigation(10_000).await.expect("load");
    let user_agent: String = page
        .evaluate("navigator.userAgent")
        .await
        .expect("evaluate userAgent after reload");
    assert_eq!(user_agent, "X");

    manager.stop("profile1").await.expect("Failed to stop");
}

#[tokio::test]
#[ignore = "requires Chrome"]
async fn session_state_survives_a_restart() {
    if !chrome_available() {
        eprintln!("Chrome not found, skipping test");
        return;
    }

    let root = tempfile::tempdir().expect("tempdir");
    let manager = BrowserManager::new(root.path());

    manager
        .launch("persist-1", LaunchOptions::default(), None)
        .await
        .expect("Failed to launch");

    let page = manager.page("persist-1").expect("page handle");
    page.goto("https://example.com")
        .await
        .expect("Failed to navigate");
    page.wait_for_navigation(20_000).await.expect("load");

    page.set_cookies(vec![CookieParam {
        name: "session".to_string(),
        value: "roundtrip".to_string(),
        domain: Some("example.com".to_string()),
        path: Some("/".to_string()),
        ..Default::default()
    }])
    .await
    .expect("set cookie");

    // stop() persists state before teardown
    manager.stop("persist-1").await.expect("Failed to stop");

    let cookies_file = root
        .path()
        .join("persist-1")
        .join("state")
        .join("cookies.json");
    assert!(cookies_file.exists(), "cookies.json not written on stop");

    manager
        .launch("persist-1", LaunchOptions::default(), None)
        .await
        .expect("Failed to relaunch");
    let page = manager.page("persist-1").expect("page handle");

    let cookies = page.cookies().await.expect("read cookies");
    let restored = cookies
        .iter()
        .find(|c| c.name == "session")
        .expect("restored cookie missing");
    assert_eq!(restored.value, "roundtrip");

    manager.stop("persist-1").await.expect("Failed to stop");
}

#[tokio::test]
#[ignore = "requires Chrome"]
async fn close_all_empties_the_registry_despite_mixed_states() {
    if !chrome_available() {
        eprintln!("Chrome not found, skipping test");
        return;
    }

    let root = tempfile::tempdir().expect("tempdir");
    let manager = BrowserManager::new(root.path());

    manager
        .launch("a", LaunchOptions::default(), None)
        .await
        .expect("launch a");
    manager
        .launch("b", LaunchOptions::default(), None)
        .await
        .expect("launch b");
    manager
        .launch("c", LaunchOptions::default(), None)
        .await
        .expect("launch c");

    // B is already stopped when close_all runs
    manager.stop("b").await.expect("stop b");

    manager.close_all().await;

    assert!(manager.statuses().is_empty());
    assert!(!manager.is_running("a").await);
    assert!(!manager.is_running("b").await);
    assert!(!manager.is_running("c").await);
}
