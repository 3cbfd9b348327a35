//! Browser launcher
//!
//! Chrome discovery, launch-flag assembly, and process spawn with DevTools
//! URL scraping.

use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};

use crate::error::{Error, Result};
use crate::profile::LaunchOptions;

/// Locate a Chrome/Chromium binary on this machine
pub fn find_chrome() -> Result<PathBuf> {
    let candidates = if cfg!(target_os = "macos") {
        vec![
            "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
            "/Applications/Chromium.app/Contents/MacOS/Chromium",
            "/Applications/Google Chrome Canary.app/Contents/MacOS/Google Chrome Canary",
        ]
    } else if cfg!(target_os = "linux") {
        vec![
            "/usr/bin/google-chrome",
            "/usr/bin/google-chrome-stable",
            "/usr/bin/chromium",
            "/usr/bin/chromium-browser",
            "/snap/bin/chromium",
        ]
    } else if cfg!(target_os = "windows") {
        vec![
            r"C:\Program Files\Google\Chrome\Application\chrome.exe",
            r"C:\Program Files (x86)\Google\Chrome\Application\chrome.exe",
        ]
    } else {
        vec![]
    };

    for candidate in candidates {
        let path = Path::new(candidate);
        if path.exists() {
            return Ok(path.to_path_buf());
        }
    }

    Err(Error::ChromeNotFound)
}

/// Fixed baseline applied to every launch: hide the automation banner,
/// keep timers/renderers from being throttled in background, keep
/// telemetry and phishing pings out of the way, and pin the color profile
/// so rendering is identical across hosts. `--no-sandbox` stays in the
/// baseline as a compatibility fallback and can be dropped through
/// `ignore_default_flags`.
const BASELINE_FLAGS: &[&str] = &[
    "--disable-blink-features=AutomationControlled",
    "--disable-features=IsolateOrigins,site-per-process,AutomationControlled,EnableAutomation,Translate,AcceptCHFrame",
    "--disable-infobars",
    "--allow-pre-commit-input",
    "--disable-background-networking",
    "--disable-background-timer-throttling",
    "--disable-backgrounding-occluded-windows",
    "--disable-renderer-backgrounding",
    "--disable-breakpad",
    "--disable-client-side-phishing-detection",
    "--disable-component-extensions-with-background-pages",
    "--disable-default-apps",
    "--disable-dev-shm-usage",
    "--disable-hang-monitor",
    "--disable-ipc-flooding-protection",
    "--disable-popup-blocking",
    "--disable-prompt-on-repost",
    "--disable-sync",
    "--force-color-profile=srgb",
    "--metrics-recording-only",
    "--no-first-run",
    "--no-default-browser-check",
    "--no-sandbox",
    "--password-store=basic",
    "--use-mock-keychain",
];

/// The `--flag` part of `--flag=value`, for ignore-list matching
fn flag_name(flag: &str) -> &str {
    flag.split('=').next().unwrap_or(flag)
}

/// Assemble the full argument list for one launch: baseline minus the
/// ignore list, then the caller's args, then the per-launch settings.
pub fn build_args(options: &LaunchOptions, user_data_dir: &Path) -> Vec<String> {
    let mut args: Vec<String> = BASELINE_FLAGS
        .iter()
        .filter(|flag| {
            !options
                .ignore_default_flags
                .iter()
                .any(|ignored| flag_name(ignored) == flag_name(flag))
        })
        .map(|s| s.to_string())
        .collect();

    args.extend(options.args.iter().cloned());

    if options.headless {
        args.push("--headless=new".into());
    }

    if options.ignore_certificate_errors {
        args.push("--ignore-certificate-errors".into());
    }

    if let Some(viewport) = &options.viewport {
        args.push(format!("--window-size={},{}", viewport.width, viewport.height));
    }

    args.push(format!("--user-data-dir={}", user_data_dir.display()));

    args
}

/// Spawn Chrome and scrape the DevTools WebSocket URL from its stderr.
///
/// Chrome prints `DevTools listening on ws://127.0.0.1:PORT/...` once the
/// debugging endpoint is up; `--remote-debugging-port=0` lets it pick a
/// free port so instances never collide.
pub fn spawn(
    chrome_path: &Path,
    args: &[String],
    env: &std::collections::HashMap<String, String>,
) -> Result<(Child, String)> {
    let mut cmd = Command::new(chrome_path);
    cmd.args(args)
        .arg("--remote-debugging-port=0")
        .envs(env)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped());

    let mut child = cmd
        .spawn()
        .map_err(|e| Error::Launch(format!("Failed to spawn browser process: {}", e)))?;

    let stderr = match child.stderr.take() {
        Some(s) => s,
        None => {
            let _ = child.kill();
            return Err(Error::Launch("No stderr from browser process".into()));
        }
    };

    let reader = BufReader::new(stderr);
    let mut ws_url = None;

    for line in reader.lines() {
        let line = match line {
            Ok(l) => l,
            Err(_) => break,
        };

        tracing::trace!("Browser stderr: {}", line);

        if line.contains("DevTools listening on") {
            if let Some(url_start) = line.find("ws://") {
                ws_url = Some(line[url_start..].trim().to_string());
                break;
            }
        }
    }

    match ws_url {
        Some(url) => {
            tracing::debug!("DevTools URL: {}", url);
            Ok((child, url))
        }
        None => {
            // The process came up but never announced the endpoint; reap it
            // so the failed launch leaves nothing behind
            let _ = child.kill();
            let _ = child.wait();
            Err(Error::Launch(
                "Browser process exited before announcing its DevTools endpoint".into(),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::Viewport;

    #[test]
    fn baseline_flags_are_present_by_default() {
        let options = LaunchOptions::default();
        let args = build_args(&options, Path::new("/tmp/p1"));
        assert!(args.iter().any(|a| a == "--disable-blink-features=AutomationControlled"));
        assert!(args.iter().any(|a| a == "--force-color-profile=srgb"));
        assert!(args.iter().any(|a| a == "--no-sandbox"));
        assert!(args.iter().any(|a| a == "--headless=new"));
        assert!(args.iter().any(|a| a == "--user-data-dir=/tmp/p1"));
    }

    #[test]
    fn ignore_list_drops_baseline_flags_by_name() {
        let options = LaunchOptions {
            ignore_default_flags: vec![
                "--no-sandbox".to_string(),
                // Value part is irrelevant for matching
                "--force-color-profile".to_string(),
            ],
            ..Default::default()
        };
        let args = build_args(&options, Path::new("/tmp/p1"));
        assert!(!args.iter().any(|a| a == "--no-sandbox"));
        assert!(!args.iter().any(|a| a.starts_with("--force-color-profile")));
        assert!(args.iter().any(|a| a == "--disable-infobars"));
    }

    #[test]
    fn caller_args_follow_the_baseline() {
        let options = LaunchOptions {
            args: vec!["--lang=de-DE".to_string()],
            headless: false,
            viewport: Some(Viewport {
                width: 1280,
                height: 800,
            }),
            ignore_certificate_errors: true,
            ..Default::default()
        };
        let args = build_args(&options, Path::new("/tmp/p1"));
        assert!(args.iter().any(|a| a == "--lang=de-DE"));
        assert!(!args.iter().any(|a| a == "--headless=new"));
        assert!(args.iter().any(|a| a == "--window-size=1280,800"));
        assert!(args.iter().any(|a| a == "--ignore-certificate-errors"));

        let baseline_pos = args.iter().position(|a| a == "--disable-infobars").unwrap();
        let caller_pos = args.iter().position(|a| a == "--lang=de-DE").unwrap();
        assert!(baseline_pos < caller_pos);
    }
}
