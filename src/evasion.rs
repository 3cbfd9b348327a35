//! Evasion script library
//!
//! Pre-navigation patches for browser globals. The assembled script is
//! registered via `Page.addScriptToEvaluateOnNewDocument`, so it runs in
//! every document context the page ever creates (first navigation, reloads,
//! sub-frames) before any page script executes. Injecting after the first
//! navigation is observably different from a real device, so the manager
//! applies this strictly before navigation is allowed.
//!
//! Patches are independent: each is wrapped in its own try/catch IIFE and a
//! profile section that is absent simply drops its patch without affecting
//! the others.

use crate::error::{Error, Result};
use crate::page::Page;
use crate::profile::{
    AudioProfile, FingerprintProfile, NavigatorProfile, ScreenProfile, TimezoneProfile, Viewport,
    WebglProfile,
};

/// Neutralize the automation indicator and scrub automation markers
const WEBDRIVER_PATCH: &str = r#"
Object.defineProperty(Object.getPrototypeOf(navigator), 'webdriver', {
    get: () => false,
    configurable: true,
    enumerable: true
});
try {
    Object.defineProperty(Navigator.prototype, 'webdriver', {
        get: () => false,
        configurable: true,
        enumerable: true
    });
} catch (e) {}

const automationProps = [
    'callPhantom', '_phantom', 'phantom', '__nightmare', 'domAutomation',
    'domAutomationController', '_selenium', 'callSelenium',
    '__webdriver_script_fn', '__driver_evaluate', '__webdriver_evaluate',
    '__selenium_evaluate', '__webdriver_script_function', 'webdriverCommand'
];
automationProps.forEach(prop => {
    try {
        if (prop in window) delete window[prop];
    } catch (e) {}
});
"#;

/// Permissions API shim: stable, subscribable status objects, with the
/// notifications state tied to the Notification global
const PERMISSIONS_PATCH: &str = r#"
if (typeof Notification === 'undefined') {
    window.Notification = {
        permission: 'default',
        requestPermission: async function() { return 'default'; }
    };
}

const statusCache = new Map();
const statusFor = (name, state) => {
    if (!statusCache.has(name)) {
        const listeners = new Set();
        statusCache.set(name, {
            name: name,
            state: state,
            onchange: null,
            addEventListener: function(type, fn) { if (type === 'change') listeners.add(fn); },
            removeEventListener: function(type, fn) { listeners.delete(fn); },
            dispatchEvent: function() { return true; }
        });
    }
    return statusCache.get(name);
};

const originalQuery = navigator.permissions && navigator.permissions.query
    ? navigator.permissions.query.bind(navigator.permissions)
    : null;

const query = function(parameters) {
    const name = parameters && parameters.name;
    if (name === 'notifications') {
        const state = Notification.permission === 'default' ? 'prompt' : Notification.permission;
        return Promise.resolve(statusFor(name, state));
    }
    if (!originalQuery) {
        return Promise.resolve(statusFor(name, 'prompt'));
    }
    return originalQuery(parameters)
        .then(result => statusFor(name, result.state))
        .catch(() => statusFor(name, 'prompt'));
};

if (navigator.permissions) {
    navigator.permissions.query = query;
} else {
    Object.defineProperty(Navigator.prototype, 'permissions', {
        get: () => ({ query: query }),
        configurable: true
    });
}
"#;

/// An empty plugin list is itself an automation signal
const PLUGINS_PATCH: &str = r#"
Object.defineProperty(Navigator.prototype, 'plugins', {
    get: () => {
        const descriptors = [
            { name: 'Chrome PDF Plugin', filename: 'internal-pdf-viewer', description: 'Portable Document Format' },
            { name: 'Chrome PDF Viewer', filename: 'mhjfbmdgcfjbbpaeojofohoefgiehjai', description: '' },
            { name: 'Native Client', filename: 'internal-nacl-plugin', description: '' }
        ];
        const pluginArray = Object.create(PluginArray.prototype);
        descriptors.forEach((p, i) => {
            const plugin = Object.create(Plugin.prototype);
            Object.defineProperties(plugin, {
                name: { value: p.name },
                filename: { value: p.filename },
                description: { value: p.description },
                length: { value: 1 }
            });
            pluginArray[i] = plugin;
        });
        Object.defineProperty(pluginArray, 'length', { value: descriptors.length });
        pluginArray.item = i => pluginArray[i];
        pluginArray.namedItem = name => descriptors.find(p => p.name === name);
        pluginArray.refresh = () => {};
        return pluginArray;
    },
    configurable: true
});
"#;

/// Feature checks against chrome.app/chrome.runtime must not throw
const CHROME_RUNTIME_PATCH: &str = r#"
if (!window.chrome) window.chrome = {};
if (!window.chrome.app) {
    window.chrome.app = {
        isInstalled: false,
        InstallState: { DISABLED: 'disabled', INSTALLED: 'installed', NOT_INSTALLED: 'not_installed' },
        RunningState: { CANNOT_RUN: 'cannot_run', READY_TO_RUN: 'ready_to_run', RUNNING: 'running' }
    };
}
if (!window.chrome.runtime) {
    window.chrome.runtime = {
        OnInstalledReason: {
            CHROME_UPDATE: 'chrome_update',
            INSTALL: 'install',
            SHARED_MODULE_UPDATE: 'shared_module_update',
            UPDATE: 'update'
        },
        PlatformOs: {
            ANDROID: 'android', CROS: 'cros', LINUX: 'linux',
            MAC: 'mac', OPENBSD: 'openbsd', WIN: 'win'
        },
        PlatformArch: {
            ARM: 'arm', ARM64: 'arm64', X86_32: 'x86-32', X86_64: 'x86-64'
        },
        connect: function() {
            return {
                onMessage: { addListener: function() {} },
                onDisconnect: { addListener: function() {} },
                postMessage: function() {}
            };
        },
        sendMessage: function() {},
        id: undefined
    };
}
"#;

/// Per-pixel noise after 2D text/image draws defeats canvas hashing while
/// staying invisible at normal scale
const CANVAS_NOISE_PATCH: &str = r#"
const addNoise = function(ctx, canvas) {
    try {
        const imageData = ctx.getImageData(0, 0, canvas.width, canvas.height);
        const data = imageData.data;
        for (let i = 0; i < data.length; i += 4) {
            data[i] += (Math.random() * 2 - 1) | 0;
            data[i + 1] += (Math.random() * 2 - 1) | 0;
            data[i + 2] += (Math.random() * 2 - 1) | 0;
        }
        ctx.putImageData(imageData, 0, 0);
    } catch (e) {}
};

const originalGetContext = HTMLCanvasElement.prototype.getContext;
HTMLCanvasElement.prototype.getContext = function(type, attributes) {
    const context = originalGetContext.call(this, type, attributes);
    if (context && type === '2d' && !context.__noised) {
        context.__noised = true;
        const canvas = this;
        ['fillText', 'strokeText', 'drawImage'].forEach(method => {
            const original = context[method];
            if (!original) return;
            context[method] = function(...args) {
                const result = original.apply(this, args);
                addNoise(this, canvas);
                return result;
            };
        });
    }
    return context;
};
"#;

fn js_str(s: &str) -> String {
    // A JSON string literal is a valid JS string literal
    serde_json::to_string(s).unwrap_or_else(|_| "\"\"".to_string())
}

/// Navigator identity overrides, non-configurable so a re-read of the
/// property descriptor cannot expose the original
fn navigator_patch(nav: &NavigatorProfile) -> String {
    let languages = serde_json::to_string(&nav.languages).unwrap_or_else(|_| "[]".to_string());
    format!(
        r#"
const overrides = {{
    userAgent: {ua},
    platform: {platform},
    language: {language},
    languages: {languages},
    hardwareConcurrency: {cores},
    deviceMemory: {memory}
}};
for (const [prop, value] of Object.entries(overrides)) {{
    try {{
        Object.defineProperty(Navigator.prototype, prop, {{
            get: () => value,
            configurable: false,
            enumerable: true
        }});
    }} catch (e) {{}}
}}
"#,
        ua = js_str(&nav.user_agent),
        platform = js_str(&nav.platform),
        language = js_str(&nav.language),
        languages = languages,
        cores = nav.hardware_concurrency,
        memory = nav.device_memory,
    )
}

/// Screen geometry plus window inner/outer dimensions; all four window
/// dimensions and the screen fields must agree with the viewport or
/// cross-checking scripts catch the mismatch
fn screen_patch(screen: &ScreenProfile, viewport: Option<Viewport>) -> String {
    let (inner_w, inner_h) = match viewport {
        Some(v) => (v.width, v.height),
        None => (screen.width, screen.height),
    };
    format!(
        r#"
const screenValues = {{
    width: {sw}, height: {sh},
    colorDepth: {cd}, pixelDepth: {pd},
    availWidth: {sw}, availHeight: {sh},
    availLeft: 0, availTop: 0
}};
for (const [prop, value] of Object.entries(screenValues)) {{
    try {{
        Object.defineProperty(screen, prop, {{ get: () => value, configurable: false }});
    }} catch (e) {{}}
}}
const windowValues = {{
    innerWidth: {iw}, innerHeight: {ih},
    outerWidth: {iw}, outerHeight: {ih}
}};
for (const [prop, value] of Object.entries(windowValues)) {{
    try {{
        Object.defineProperty(window, prop, {{ get: () => value, configurable: true }});
    }} catch (e) {{}}
}}
"#,
        sw = screen.width,
        sh = screen.height,
        cd = screen.color_depth,
        pd = screen.pixel_depth,
        iw = inner_w,
        ih = inner_h,
    )
}

/// Forge only the vendor/renderer identifier queries; every other
/// parameter passes through so capability probes still see real answers
fn webgl_patch(webgl: &WebglProfile) -> String {
    format!(
        r#"
const vendor = {vendor};
const renderer = {renderer};
const patchProto = proto => {{
    const original = proto.getParameter;
    proto.getParameter = function(parameter) {{
        // VENDOR / RENDERER
        if (parameter === 0x1F00) return vendor;
        if (parameter === 0x1F01) return renderer;
        // UNMASKED_VENDOR_WEBGL / UNMASKED_RENDERER_WEBGL
        if (parameter === 0x9245) return vendor;
        if (parameter === 0x9246) return renderer;
        return original.call(this, parameter);
    }};
}};
patchProto(WebGLRenderingContext.prototype);
if (typeof WebGL2RenderingContext !== 'undefined') {{
    patchProto(WebGL2RenderingContext.prototype);
}}
"#,
        vendor = js_str(&webgl.vendor),
        renderer = js_str(&webgl.renderer),
    )
}

/// Audio contexts report the profile's hardware, not the host's
fn audio_patch(audio: &AudioProfile) -> String {
    format!(
        r#"
const OriginalAudioContext = window.AudioContext || window.webkitAudioContext;
if (OriginalAudioContext) {{
    window.AudioContext = class extends OriginalAudioContext {{
        constructor(options) {{
            super(options);
            Object.defineProperty(this, 'sampleRate', {{ value: {rate} }});
            try {{
                Object.defineProperty(this.destination, 'maxChannelCount', {{ value: {channels} }});
                Object.defineProperty(this.destination, 'channelCount', {{ value: {channels} }});
            }} catch (e) {{}}
        }}
    }};
    window.webkitAudioContext = window.AudioContext;
}}
"#,
        rate = audio.sample_rate,
        channels = audio.channels,
    )
}

/// Intl and Date must report the same timezone or the two are trivially
/// cross-checked
fn timezone_patch(tz: &TimezoneProfile) -> String {
    format!(
        r#"
const zone = {zone};
const OriginalDateTimeFormat = Intl.DateTimeFormat;
Intl.DateTimeFormat = function(locales, options) {{
    options = options || {{}};
    if (!options.timeZone) options.timeZone = zone;
    return new OriginalDateTimeFormat(locales, options);
}};
Intl.DateTimeFormat.prototype = OriginalDateTimeFormat.prototype;
Intl.DateTimeFormat.supportedLocalesOf = OriginalDateTimeFormat.supportedLocalesOf;

Date.prototype.getTimezoneOffset = function() {{ return {offset}; }};
"#,
        zone = js_str(&tz.zone_name),
        offset = tz.offset_minutes,
    )
}

fn guard(body: &str) -> String {
    format!("(function() {{ try {{{}}} catch (e) {{}} }})();", body)
}

/// Assemble the injection script for a profile.
///
/// Always-on patches (webdriver, permissions, plugins, chrome runtime,
/// canvas noise) come first; profile-driven patches are appended only for
/// the sections that are present.
pub fn build_injection_script(
    profile: &FingerprintProfile,
    viewport: Option<Viewport>,
) -> String {
    let mut patches = vec![
        guard(WEBDRIVER_PATCH),
        guard(PERMISSIONS_PATCH),
        guard(PLUGINS_PATCH),
        guard(CHROME_RUNTIME_PATCH),
        guard(CANVAS_NOISE_PATCH),
    ];

    if let Some(nav) = &profile.navigator {
        patches.push(guard(&navigator_patch(nav)));
    }
    if let Some(screen) = &profile.screen {
        patches.push(guard(&screen_patch(screen, viewport)));
    }
    if let Some(webgl) = &profile.webgl {
        patches.push(guard(&webgl_patch(webgl)));
    }
    if let Some(audio) = &profile.audio {
        patches.push(guard(&audio_patch(audio)));
    }
    if let Some(tz) = &profile.timezone {
        patches.push(guard(&timezone_patch(tz)));
    }

    patches.join("\n")
}

/// Apply a fingerprint to a page before its first navigation.
///
/// Registers the injection script, then applies the authoritative
/// browser-level settings that are not worth spoofing indirectly: the real
/// User-Agent string, the real viewport, and a fixed geolocation when the
/// profile carries one.
pub async fn apply_profile(
    page: &Page,
    profile: &FingerprintProfile,
    viewport: Option<Viewport>,
) -> Result<()> {
    let script = build_injection_script(profile, viewport);
    page.session()
        .add_script_to_evaluate_on_new_document(&script)
        .await
        .map_err(|e| Error::Injection(format!("script registration failed: {}", e)))?;

    if let Some(nav) = &profile.navigator {
        page.session()
            .set_user_agent(
                &nav.user_agent,
                Some(&nav.languages.join(",")),
                Some(&nav.platform),
            )
            .await
            .map_err(|e| Error::Injection(format!("user agent override failed: {}", e)))?;
    }

    let effective = viewport.or_else(|| {
        profile.screen.map(|s| Viewport {
            width: s.width,
            height: s.height,
        })
    });
    if let Some(v) = effective {
        page.session()
            .set_viewport(v.width, v.height)
            .await
            .map_err(|e| Error::Injection(format!("viewport override failed: {}", e)))?;
    }

    if let Some(geo) = &profile.geolocation {
        page.session()
            .set_geolocation(geo.latitude, geo.longitude, geo.accuracy)
            .await
            .map_err(|e| Error::Injection(format!("geolocation override failed: {}", e)))?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::{NavigatorProfile, ScreenProfile, WebglProfile};

    fn nav_section() -> NavigatorProfile {
        NavigatorProfile {
            user_agent: "TestAgent/1.0".to_string(),
            platform: "MacIntel".to_string(),
            language: "en-US".to_string(),
            languages: vec!["en-US".to_string(), "en".to_string()],
            hardware_concurrency: 8,
            device_memory: 16,
        }
    }

    #[test]
    fn empty_profile_still_gets_baseline_patches() {
        let script = build_injection_script(&FingerprintProfile::default(), None);
        assert!(script.contains("webdriver"));
        assert!(script.contains("permissions"));
        assert!(script.contains("PluginArray"));
        assert!(script.contains("chrome.runtime") || script.contains("window.chrome"));
        assert!(script.contains("getImageData"));
        // No profile-driven patches
        assert!(!script.contains("WebGLRenderingContext"));
        assert!(!script.contains("hardwareConcurrency"));
    }

    #[test]
    fn navigator_values_are_embedded_verbatim() {
        let profile = FingerprintProfile {
            navigator: Some(nav_section()),
            ..Default::default()
        };
        let script = build_injection_script(&profile, None);
        assert!(script.contains("\"TestAgent/1.0\""));
        assert!(script.contains("\"MacIntel\""));
        assert!(script.contains("hardwareConcurrency: 8"));
        assert!(script.contains("deviceMemory: 16"));
        assert!(script.contains("configurable: false"));
    }

    #[test]
    fn absent_webgl_does_not_disable_other_patches() {
        let profile = FingerprintProfile {
            navigator: Some(nav_section()),
            screen: Some(ScreenProfile {
                width: 1280,
                height: 800,
                color_depth: 24,
                pixel_depth: 24,
            }),
            ..Default::default()
        };
        let script = build_injection_script(&profile, None);
        assert!(!script.contains("WebGLRenderingContext"));
        assert!(script.contains("hardwareConcurrency"));
        assert!(script.contains("width: 1280"));
    }

    #[test]
    fn screen_patch_uses_viewport_for_window_dimensions() {
        let profile = FingerprintProfile {
            screen: Some(ScreenProfile {
                width: 2560,
                height: 1440,
                color_depth: 24,
                pixel_depth: 24,
            }),
            ..Default::default()
        };
        let script = build_injection_script(
            &profile,
            Some(Viewport {
                width: 1280,
                height: 800,
            }),
        );
        // Screen reports the profile, the window reports the viewport
        assert!(script.contains("width: 2560"));
        assert!(script.contains("innerWidth: 1280"));
        assert!(script.contains("outerWidth: 1280"));
    }

    #[test]
    fn webgl_patch_forges_only_identifier_queries() {
        let profile = FingerprintProfile {
            webgl: Some(WebglProfile {
                vendor: "Forged Vendor".to_string(),
                renderer: "Forged Renderer".to_string(),
            }),
            ..Default::default()
        };
        let script = build_injection_script(&profile, None);
        assert!(script.contains("0x9245"));
        assert!(script.contains("0x9246"));
        assert!(script.contains("original.call(this, parameter)"));
        assert!(script.contains("\"Forged Vendor\""));
    }

    #[test]
    fn string_values_are_escaped_for_js() {
        let mut nav = nav_section();
        nav.user_agent = "Agent \"quoted\"\nnewline".to_string();
        let profile = FingerprintProfile {
            navigator: Some(nav),
            ..Default::default()
        };
        let script = build_injection_script(&profile, None);
        assert!(script.contains(r#"\"quoted\""#));
        assert!(script.contains(r"\n"));
    }

    #[test]
    fn patches_are_individually_guarded() {
        let script = build_injection_script(&FingerprintProfile::random(), None);
        // One guard per patch keeps a throwing patch from disabling the rest
        let guards = script.matches("(function() { try {").count();
        assert!(guards >= 8, "expected at least 8 guarded patches, got {}", guards);
    }
}
