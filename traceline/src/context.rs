//! Host environment snapshots and context enrichment
//!
//! The engine knows nothing about where it runs; the host hands it a
//! [`HostEnvironment`] and the pure functions here turn its snapshot into the
//! browser/OS/UI/request descriptors carried by every outbound record.
//! Anything that cannot be determined resolves to the literal `"Unknown"`
//! instead of failing.

use serde::Serialize;
use url::Url;

/// Marker used for any descriptor field that cannot be determined
pub const UNKNOWN: &str = "Unknown";

/// Point-in-time description of the host context
///
/// Captured fresh for every delivery attempt so the envelope reflects the
/// state at send time, not at record-creation time.
#[derive(Debug, Clone, Default)]
pub struct EnvironmentSnapshot {
    pub user_agent: String,
    /// BCP 47 tag, e.g. `en-US`
    pub language: String,
    /// Current document/page title
    pub title: String,
    /// Full current URL
    pub url: String,
    pub referrer: String,
    pub screen_width: u32,
    pub screen_height: u32,
    pub dark_mode: bool,
    pub portrait: bool,
}

/// Source of environment snapshots and connectivity state
///
/// Implemented by the host shell (a wasm bridge, a webview adapter, a test
/// stub). Must be cheap to call; the engine queries it on every send.
pub trait HostEnvironment: Send + Sync {
    fn snapshot(&self) -> EnvironmentSnapshot;

    /// Whether the host currently has network connectivity. The retry sweep
    /// is skipped while offline.
    fn is_online(&self) -> bool {
        true
    }
}

/// Fixed-snapshot environment for hosts without dynamic context (and tests)
#[derive(Debug, Default)]
pub struct StaticEnvironment {
    snapshot: EnvironmentSnapshot,
    offline: std::sync::atomic::AtomicBool,
}

impl StaticEnvironment {
    pub fn new(snapshot: EnvironmentSnapshot) -> Self {
        Self {
            snapshot,
            offline: std::sync::atomic::AtomicBool::new(false),
        }
    }

    pub fn set_online(&self, online: bool) {
        self.offline
            .store(!online, std::sync::atomic::Ordering::SeqCst);
    }
}

impl HostEnvironment for StaticEnvironment {
    fn snapshot(&self) -> EnvironmentSnapshot {
        self.snapshot.clone()
    }

    fn is_online(&self) -> bool {
        !self.offline.load(std::sync::atomic::Ordering::SeqCst)
    }
}

/// Browser descriptor
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BrowserInfo {
    pub name: String,
    pub version: String,
}

/// Operating system descriptor
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OsInfo {
    pub name: String,
    pub version: String,
    /// Device class: desktop, mobile or tablet
    #[serde(rename = "type")]
    pub device: String,
}

/// Screen dimensions in CSS pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ScreenSize {
    pub width: u32,
    pub height: u32,
}

/// UI state descriptor
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UiInfo {
    pub dark_mode: bool,
    pub screen: ScreenSize,
    /// "portrait" or "landscape"
    pub display_mode: String,
}

/// Current document/location descriptor
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestInfo {
    pub title: String,
    pub user_agent: String,
    pub url: String,
    pub origin: String,
    pub path: String,
    pub query_params: String,
    pub hash: String,
    pub referrer: String,
}

/// Returns the digits immediately following `marker`, if any
fn version_after(user_agent: &str, marker: &str) -> Option<String> {
    let rest = &user_agent[user_agent.find(marker)? + marker.len()..];
    let version: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
    (!version.is_empty()).then_some(version)
}

/// Returns a dotted version following `marker`, accepting `_` separators
fn os_version_after(user_agent: &str, marker: &str) -> Option<String> {
    let rest = &user_agent[user_agent.find(marker)? + marker.len()..];
    let version: String = rest
        .chars()
        .take_while(|c| c.is_ascii_digit() || *c == '.' || *c == '_')
        .collect();
    let version = version.trim_matches(|c| c == '.' || c == '_').replace('_', ".");
    (!version.is_empty()).then_some(version)
}

/// Detect browser name and major version from a user-agent string
pub fn browser_info(user_agent: &str) -> BrowserInfo {
    let (name, version) = if user_agent.contains("Chrome") {
        ("Chrome", version_after(user_agent, "Chrome/"))
    } else if user_agent.contains("Firefox") {
        ("Firefox", version_after(user_agent, "Firefox/"))
    } else if user_agent.contains("Safari") {
        ("Safari", version_after(user_agent, "Version/"))
    } else if user_agent.contains("Edg") {
        ("Edge", version_after(user_agent, "Edg/"))
    } else if user_agent.contains("Trident") {
        ("Internet Explorer", version_after(user_agent, "rv:"))
    } else {
        (UNKNOWN, None)
    };

    BrowserInfo {
        name: name.to_string(),
        version: version.unwrap_or_else(|| UNKNOWN.to_string()),
    }
}

/// Detect OS name, version and device class from a user-agent string
pub fn os_info(user_agent: &str) -> OsInfo {
    let (name, version, device) = if user_agent.contains("Android") {
        let device = if user_agent.contains("Mobile") {
            "mobile"
        } else {
            "tablet"
        };
        ("Android", os_version_after(user_agent, "Android "), device)
    } else if ["iPad", "iPhone", "iPod"].iter().any(|m| user_agent.contains(m)) {
        let device = if user_agent.contains("iPad") {
            "tablet"
        } else {
            "mobile"
        };
        ("iOS", os_version_after(user_agent, "OS "), device)
    } else if user_agent.contains("Windows") {
        ("Windows", os_version_after(user_agent, "Windows NT "), "desktop")
    } else if user_agent.contains("Macintosh") || user_agent.contains("Mac OS X") {
        ("macOS", os_version_after(user_agent, "Mac OS X "), "desktop")
    } else if user_agent.contains("Linux") {
        ("Linux", None, "desktop")
    } else if user_agent.contains("CrOS") {
        ("Chrome OS", cros_version(user_agent), "desktop")
    } else {
        (UNKNOWN, None, UNKNOWN)
    };

    OsInfo {
        name: name.to_string(),
        version: version.unwrap_or_else(|| UNKNOWN.to_string()),
        device: device.to_string(),
    }
}

/// Chrome OS version sits after the architecture token: `CrOS x86_64 14541`
fn cros_version(user_agent: &str) -> Option<String> {
    let rest = &user_agent[user_agent.find("CrOS ")? + "CrOS ".len()..];
    let after_arch = &rest[rest.find(' ')? + 1..];
    let version: String = after_arch
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    (!version.is_empty()).then_some(version)
}

/// Build the UI descriptor from a snapshot
pub fn ui_info(snapshot: &EnvironmentSnapshot) -> UiInfo {
    UiInfo {
        dark_mode: snapshot.dark_mode,
        screen: ScreenSize {
            width: snapshot.screen_width,
            height: snapshot.screen_height,
        },
        display_mode: if snapshot.portrait {
            "portrait".to_string()
        } else {
            "landscape".to_string()
        },
    }
}

/// Build the request descriptor from a snapshot, decomposing the URL
pub fn request_info(snapshot: &EnvironmentSnapshot) -> RequestInfo {
    let (origin, path, query_params, hash) = match Url::parse(&snapshot.url) {
        Ok(url) => (
            url.origin().ascii_serialization(),
            url.path().to_string(),
            url.query().map(|q| format!("?{}", q)).unwrap_or_default(),
            url.fragment().map(|f| format!("#{}", f)).unwrap_or_default(),
        ),
        Err(_) => (
            UNKNOWN.to_string(),
            UNKNOWN.to_string(),
            String::new(),
            String::new(),
        ),
    };

    RequestInfo {
        title: snapshot.title.clone(),
        user_agent: snapshot.user_agent.clone(),
        url: snapshot.url.clone(),
        origin,
        path,
        query_params,
        hash,
        referrer: snapshot.referrer.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CHROME_LINUX: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";
    const FIREFOX_WIN: &str =
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:130.0) Gecko/20100101 Firefox/130.0";
    const SAFARI_MAC: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.4 Safari/605.1.15";
    const IPHONE: &str = "Mozilla/5.0 (iPhone; CPU iPhone OS 17_4 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.4 Mobile/15E148 Safari/604.1";
    const ANDROID_TABLET: &str = "Mozilla/5.0 (Linux; Android 13; SM-X700) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

    #[test]
    fn test_browser_detection() {
        let chrome = browser_info(CHROME_LINUX);
        assert_eq!(chrome.name, "Chrome");
        assert_eq!(chrome.version, "120");

        let firefox = browser_info(FIREFOX_WIN);
        assert_eq!(firefox.name, "Firefox");
        assert_eq!(firefox.version, "130");

        let safari = browser_info(SAFARI_MAC);
        assert_eq!(safari.name, "Safari");
        assert_eq!(safari.version, "17");
    }

    #[test]
    fn test_browser_unknown() {
        let info = browser_info("curl/8.4.0");
        assert_eq!(info.name, UNKNOWN);
        assert_eq!(info.version, UNKNOWN);
    }

    #[test]
    fn test_os_detection() {
        let windows = os_info(FIREFOX_WIN);
        assert_eq!(windows.name, "Windows");
        assert_eq!(windows.version, "10.0");
        assert_eq!(windows.device, "desktop");

        let mac = os_info(SAFARI_MAC);
        assert_eq!(mac.name, "macOS");
        assert_eq!(mac.version, "10.15.7");
        assert_eq!(mac.device, "desktop");

        let ios = os_info(IPHONE);
        assert_eq!(ios.name, "iOS");
        assert_eq!(ios.version, "17.4");
        assert_eq!(ios.device, "mobile");

        let android = os_info(ANDROID_TABLET);
        assert_eq!(android.name, "Android");
        assert_eq!(android.version, "13");
        assert_eq!(android.device, "tablet");

        let linux = os_info(CHROME_LINUX);
        assert_eq!(linux.name, "Linux");
        assert_eq!(linux.version, UNKNOWN);
    }

    #[test]
    fn test_os_unknown() {
        let info = os_info("curl/8.4.0");
        assert_eq!(info.name, UNKNOWN);
        assert_eq!(info.device, UNKNOWN);
    }

    #[test]
    fn test_request_info_decomposes_url() {
        let snapshot = EnvironmentSnapshot {
            url: "https://shop.example.com/cart/items?promo=x#summary".to_string(),
            title: "Cart".to_string(),
            ..Default::default()
        };

        let request = request_info(&snapshot);
        assert_eq!(request.origin, "https://shop.example.com");
        assert_eq!(request.path, "/cart/items");
        assert_eq!(request.query_params, "?promo=x");
        assert_eq!(request.hash, "#summary");
        assert_eq!(request.title, "Cart");
    }

    #[test]
    fn test_request_info_unparseable_url() {
        let snapshot = EnvironmentSnapshot {
            url: "not a url".to_string(),
            ..Default::default()
        };

        let request = request_info(&snapshot);
        assert_eq!(request.origin, UNKNOWN);
        assert_eq!(request.path, UNKNOWN);
        assert_eq!(request.query_params, "");
    }

    #[test]
    fn test_ui_info() {
        let snapshot = EnvironmentSnapshot {
            screen_width: 390,
            screen_height: 844,
            dark_mode: true,
            portrait: true,
            ..Default::default()
        };

        let ui = ui_info(&snapshot);
        assert!(ui.dark_mode);
        assert_eq!(ui.screen.width, 390);
        assert_eq!(ui.display_mode, "portrait");
    }

    #[test]
    fn test_static_environment_connectivity() {
        let env = StaticEnvironment::default();
        assert!(env.is_online());
        env.set_online(false);
        assert!(!env.is_online());
    }
}
