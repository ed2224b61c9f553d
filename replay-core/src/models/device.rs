use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceType {
    Desktop,
    Mobile,
    Tablet,
}

impl DeviceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceType::Desktop => "desktop",
            DeviceType::Mobile => "mobile",
            DeviceType::Tablet => "tablet",
        }
    }
}

/// Device/browser/OS classification derived from a user-agent string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub device_type: DeviceType,
    pub browser: String,
    pub os: String,
}

struct Patterns {
    tablet: Option<Regex>,
    android: Option<Regex>,
    mobile: Option<Regex>,
    browsers: Vec<(Regex, &'static str)>,
    systems: Vec<(Regex, &'static str)>,
}

fn compile(table: &[(&str, &'static str)]) -> Vec<(Regex, &'static str)> {
    table
        .iter()
        .filter_map(|(pattern, name)| Regex::new(pattern).ok().map(|re| (re, *name)))
        .collect()
}

fn patterns() -> &'static Patterns {
    static PATTERNS: OnceLock<Patterns> = OnceLock::new();
    PATTERNS.get_or_init(|| Patterns {
        tablet: Regex::new(r"(?i)ipad|tablet|playbook|silk|kindle").ok(),
        android: Regex::new(r"(?i)android").ok(),
        mobile: Regex::new(r"(?i)mobi|iphone|ipod|blackberry|opera mini|iemobile|windows phone").ok(),
        // Order matters: Edge and Opera also advertise Chrome, Chrome advertises Safari.
        browsers: compile(&[
            (r"(?i)edg(e|a|ios)?/", "Edge"),
            (r"(?i)opr/|opera", "Opera"),
            (r"(?i)samsungbrowser", "Samsung Internet"),
            (r"(?i)chrome|crios|chromium", "Chrome"),
            (r"(?i)firefox|fxios", "Firefox"),
            (r"(?i)msie|trident/", "Internet Explorer"),
            (r"(?i)safari", "Safari"),
        ]),
        // iPadOS reports "like Mac OS X", so iOS is checked first.
        systems: compile(&[
            (r"(?i)iphone|ipad|ipod", "iOS"),
            (r"(?i)android", "Android"),
            (r"(?i)windows", "Windows"),
            (r"(?i)\bcros\b", "ChromeOS"),
            (r"(?i)mac os x|macintosh", "macOS"),
            (r"(?i)linux|x11", "Linux"),
        ]),
    })
}

fn matches(re: &Option<Regex>, user_agent: &str) -> bool {
    re.as_ref().is_some_and(|re| re.is_match(user_agent))
}

pub fn classify(user_agent: &str) -> DeviceInfo {
    let p = patterns();

    let is_android = matches(&p.android, user_agent);
    let is_mobile = matches(&p.mobile, user_agent);
    let device_type = if matches(&p.tablet, user_agent) || (is_android && !is_mobile) {
        DeviceType::Tablet
    } else if is_mobile || is_android {
        DeviceType::Mobile
    } else {
        DeviceType::Desktop
    };

    let lookup = |table: &[(Regex, &'static str)]| {
        table
            .iter()
            .find(|(re, _)| re.is_match(user_agent))
            .map(|(_, name)| name.to_string())
            .unwrap_or_else(|| "Unknown".to_string())
    };

    DeviceInfo {
        device_type,
        browser: lookup(&p.browsers),
        os: lookup(&p.systems),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_desktop_chrome_on_windows() {
        let info = classify(
            "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
             (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
        );
        assert_eq!(info.device_type, DeviceType::Desktop);
        assert_eq!(info.browser, "Chrome");
        assert_eq!(info.os, "Windows");
    }

    #[test]
    fn test_iphone_safari() {
        let info = classify(
            "Mozilla/5.0 (iPhone; CPU iPhone OS 17_0 like Mac OS X) AppleWebKit/605.1.15 \
             (KHTML, like Gecko) Version/17.0 Mobile/15E148 Safari/604.1",
        );
        assert_eq!(info.device_type, DeviceType::Mobile);
        assert_eq!(info.browser, "Safari");
        assert_eq!(info.os, "iOS");
    }

    #[test]
    fn test_android_tablet_without_mobile_token() {
        let info = classify(
            "Mozilla/5.0 (Linux; Android 13; SM-X700) AppleWebKit/537.36 \
             (KHTML, like Gecko) Chrome/119.0.0.0 Safari/537.36",
        );
        assert_eq!(info.device_type, DeviceType::Tablet);
        assert_eq!(info.os, "Android");
    }

    #[test]
    fn test_edge_wins_over_chrome() {
        let info = classify(
            "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 \
             (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36 Edg/120.0.0.0",
        );
        assert_eq!(info.browser, "Edge");
        assert_eq!(info.os, "macOS");
    }

    #[test]
    fn test_unknown_agent() {
        let info = classify("curl/8.4.0");
        assert_eq!(info.device_type, DeviceType::Desktop);
        assert_eq!(info.browser, "Unknown");
        assert_eq!(info.os, "Unknown");
    }
}
