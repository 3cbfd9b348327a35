//! Fingerprint profiles and launch options
//!
//! A `FingerprintProfile` is the immutable description of one synthetic
//! identity. All sections are optional: an absent section is simply not
//! overridden in the browser. The engine does not cross-validate
//! plausibility; `FingerprintProfile::random()` produces sets that are
//! jointly plausible by construction.

use std::collections::HashMap;
use std::path::PathBuf;

use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Navigator identity fields
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NavigatorProfile {
    pub user_agent: String,
    pub platform: String,
    pub language: String,
    pub languages: Vec<String>,
    pub hardware_concurrency: u32,
    pub device_memory: u32,
}

/// Screen geometry
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScreenProfile {
    pub width: u32,
    pub height: u32,
    pub color_depth: u32,
    pub pixel_depth: u32,
}

/// WebGL identifier strings returned for vendor/renderer queries
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebglProfile {
    pub vendor: String,
    pub renderer: String,
}

/// Audio hardware characteristics
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioProfile {
    pub sample_rate: u32,
    pub channels: u32,
}

/// Timezone presented through Intl and Date
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimezoneProfile {
    pub offset_minutes: i32,
    pub zone_name: String,
}

/// Fixed coordinate for geolocation emulation
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeoOverride {
    pub latitude: f64,
    pub longitude: f64,
    pub accuracy: f64,
}

/// A complete synthetic identity. Partial profiles are legal.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FingerprintProfile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub navigator: Option<NavigatorProfile>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screen: Option<ScreenProfile>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webgl: Option<WebglProfile>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio: Option<AudioProfile>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timezone: Option<TimezoneProfile>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub geolocation: Option<GeoOverride>,
}

/// Page viewport dimensions
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

/// Options for one browser launch. Constructed by the caller or the config
/// layer, consumed once, never mutated by the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LaunchOptions {
    pub headless: bool,
    #[serde(default)]
    pub args: Vec<String>,
    /// Exclusively owned by one live instance; defaulted from the instance
    /// name when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_data_dir: Option<PathBuf>,
    /// Baseline flags to drop from the launch command line
    #[serde(default)]
    pub ignore_default_flags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub viewport: Option<Viewport>,
    #[serde(default)]
    pub ignore_certificate_errors: bool,
    /// Explicit browser binary; discovery runs when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chrome_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub env: HashMap<String, String>,
}

impl Default for LaunchOptions {
    fn default() -> Self {
        Self {
            headless: true,
            args: Vec::new(),
            user_data_dir: None,
            ignore_default_flags: Vec::new(),
            viewport: None,
            ignore_certificate_errors: false,
            chrome_path: None,
            env: HashMap::new(),
        }
    }
}

/// Chrome versions (recent, realistic)
const CHROME_VERSIONS: &[&str] = &[
    "122.0.0.0",
    "124.0.0.0",
    "126.0.0.0",
    "127.0.0.0",
    "128.0.0.0",
    "129.0.0.0",
    "131.0.0.0",
    "132.0.0.0",
    "134.0.0.0",
];

const MACOS_VERSIONS: &[&str] = &[
    "10_15_7", "12_6_0", "13_4_0", "14_0_0", "14_2_0", "14_4_0",
];

/// WebGL renderers by platform; vendor strings must match the renderer's
/// GPU family or cross-checks flag the pair
const WEBGL_MAC: &[(&str, &str)] = &[
    ("Google Inc. (Apple)", "ANGLE (Apple, Apple M1 Pro, OpenGL 4.1)"),
    ("Google Inc. (Apple)", "ANGLE (Apple, Apple M2, OpenGL 4.1)"),
    ("Google Inc. (Apple)", "ANGLE (Apple, Apple M3, OpenGL 4.1)"),
    (
        "Google Inc. (Intel)",
        "ANGLE (Intel, Intel Iris Pro Graphics 6200, OpenGL 4.1)",
    ),
];

const WEBGL_WINDOWS: &[(&str, &str)] = &[
    (
        "Google Inc. (NVIDIA Corporation)",
        "ANGLE (NVIDIA, NVIDIA GeForce RTX 3080, Direct3D11)",
    ),
    (
        "Google Inc. (NVIDIA Corporation)",
        "ANGLE (NVIDIA, NVIDIA GeForce GTX 1080, Direct3D11)",
    ),
    (
        "Google Inc. (AMD)",
        "ANGLE (AMD, AMD Radeon RX 6800 XT, Direct3D11)",
    ),
    (
        "Google Inc. (Intel)",
        "ANGLE (Intel, Intel UHD Graphics 770, Direct3D11)",
    ),
];

const SCREEN_RESOLUTIONS: &[(u32, u32)] = &[
    (1920, 1080),
    (2560, 1440),
    (1680, 1050),
    (2560, 1600),
    (3024, 1964),
    (3456, 2234),
];

/// Generate a realistic Chrome user agent for the given platform string
fn user_agent_for(mac: bool, rng: &mut impl Rng) -> String {
    let chrome = CHROME_VERSIONS.choose(rng).unwrap();
    if mac {
        let macos = MACOS_VERSIONS.choose(rng).unwrap();
        format!(
            "Mozilla/5.0 (Macintosh; Intel Mac OS X {}) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/{} Safari/537.36",
            macos, chrome
        )
    } else {
        format!(
            "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/{} Safari/537.36",
            chrome
        )
    }
}

impl FingerprintProfile {
    /// Generate a random, internally consistent identity
    pub fn random() -> Self {
        let mut rng = rand::thread_rng();

        let mac = rng.gen_bool(0.7);
        let (width, height) = *SCREEN_RESOLUTIONS.choose(&mut rng).unwrap();
        let (vendor, renderer) = if mac {
            *WEBGL_MAC.choose(&mut rng).unwrap()
        } else {
            *WEBGL_WINDOWS.choose(&mut rng).unwrap()
        };

        Self {
            navigator: Some(NavigatorProfile {
                user_agent: user_agent_for(mac, &mut rng),
                platform: if mac { "MacIntel" } else { "Win32" }.to_string(),
                language: "en-US".to_string(),
                languages: vec!["en-US".to_string(), "en".to_string()],
                hardware_concurrency: *[4u32, 8, 10, 12, 16].choose(&mut rng).unwrap(),
                device_memory: *[8u32, 16, 32].choose(&mut rng).unwrap(),
            }),
            screen: Some(ScreenProfile {
                width,
                height,
                color_depth: 24,
                pixel_depth: 24,
            }),
            webgl: Some(WebglProfile {
                vendor: vendor.to_string(),
                renderer: renderer.to_string(),
            }),
            audio: Some(AudioProfile {
                sample_rate: *[44100u32, 48000].choose(&mut rng).unwrap(),
                channels: 2,
            }),
            timezone: Some(TimezoneProfile {
                offset_minutes: 480,
                zone_name: "America/Los_Angeles".to_string(),
            }),
            geolocation: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn random_profile_is_complete_and_consistent() {
        for _ in 0..20 {
            let fp = FingerprintProfile::random();
            let nav = fp.navigator.unwrap();
            assert!(nav.user_agent.starts_with("Mozilla/5.0"));
            assert!(nav.user_agent.contains("Chrome/"));

            let screen = fp.screen.unwrap();
            assert!(screen.width > 0 && screen.height > 0);

            // WebGL renderer platform must agree with the claimed OS
            let renderer = fp.webgl.unwrap().renderer;
            if nav.platform == "MacIntel" {
                assert!(nav.user_agent.contains("Macintosh"));
                assert!(renderer.contains("OpenGL"));
            } else {
                assert!(nav.user_agent.contains("Windows"));
                assert!(renderer.contains("Direct3D11"));
            }
        }
    }

    #[test]
    fn partial_profile_roundtrips_through_json() {
        let json = r#"{"navigator":{"userAgent":"UA","platform":"MacIntel","language":"en-US","languages":["en-US"],"hardwareConcurrency":8,"deviceMemory":8}}"#;
        let fp: FingerprintProfile = serde_json::from_str(json).unwrap();
        assert!(fp.navigator.is_some());
        assert!(fp.screen.is_none());
        assert!(fp.webgl.is_none());

        let back = serde_json::to_string(&fp).unwrap();
        assert!(back.contains("userAgent"));
        assert!(!back.contains("screen"));
    }

    #[test]
    fn launch_options_accept_config_shape() {
        let json = r#"{
            "headless": true,
            "args": ["--lang=en-US"],
            "userDataDir": "/tmp/profiles/p1/user-data",
            "ignoreDefaultFlags": ["--no-sandbox"],
            "viewport": {"width": 1280, "height": 800},
            "ignoreCertificateErrors": true
        }"#;
        let opts: LaunchOptions = serde_json::from_str(json).unwrap();
        assert!(opts.headless);
        assert_eq!(opts.args, vec!["--lang=en-US"]);
        assert_eq!(opts.ignore_default_flags, vec!["--no-sandbox"]);
        assert_eq!(opts.viewport.unwrap().width, 1280);
        assert!(opts.ignore_certificate_errors);
    }
}
