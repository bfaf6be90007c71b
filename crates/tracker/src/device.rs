//! Device & context snapshot: derived once from the navigation context at
//! start-up and attached to the visitor profile, never per event.

use serde::{Deserialize, Serialize};
use url::Url;

/// What the host environment exposes about the current page and browser.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NavigationContext {
    pub url: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub referrer: String,
    pub user_agent: String,
    pub screen_width: u32,
    pub screen_height: u32,
    pub viewport_width: u32,
    pub viewport_height: u32,
    pub language: String,
    pub timezone: String,
    #[serde(default)]
    pub connection_type: Option<String>,
}

impl Default for NavigationContext {
    fn default() -> Self {
        Self {
            url: "http://localhost/".to_string(),
            title: String::new(),
            referrer: String::new(),
            user_agent: String::new(),
            screen_width: 0,
            screen_height: 0,
            viewport_width: 0,
            viewport_height: 0,
            language: "en".to_string(),
            timezone: "UTC".to_string(),
            connection_type: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DeviceType {
    Mobile,
    Tablet,
    Desktop,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceSnapshot {
    pub user_agent: String,
    pub screen_width: u32,
    pub screen_height: u32,
    pub viewport_width: u32,
    pub viewport_height: u32,
    pub device_type: DeviceType,
    pub browser: String,
    pub os: String,
    pub language: String,
    pub timezone: String,
    pub connection_type: String,
}

/// Campaign attribution parameters from the landing URL.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UtmParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub utm_source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub utm_medium: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub utm_campaign: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub utm_term: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub utm_content: Option<String>,
}

// Ordered: first match wins.
const BROWSERS: &[(&str, &str)] = &[
    ("Chrome", "Chrome"),
    ("Firefox", "Firefox"),
    ("Safari", "Safari"),
    ("Edge", "Edge"),
];

const OPERATING_SYSTEMS: &[(&str, &str)] = &[
    ("Windows", "Windows"),
    ("Mac", "MacOS"),
    ("Linux", "Linux"),
    ("Android", "Android"),
    ("iOS", "iOS"),
    ("iPhone", "iOS"),
];

impl DeviceSnapshot {
    pub fn capture(ctx: &NavigationContext) -> Self {
        Self {
            user_agent: ctx.user_agent.clone(),
            screen_width: ctx.screen_width,
            screen_height: ctx.screen_height,
            viewport_width: ctx.viewport_width,
            viewport_height: ctx.viewport_height,
            device_type: classify_device(&ctx.user_agent),
            browser: first_match(&ctx.user_agent, BROWSERS),
            os: first_match(&ctx.user_agent, OPERATING_SYSTEMS),
            language: ctx.language.clone(),
            timezone: ctx.timezone.clone(),
            connection_type: ctx
                .connection_type
                .clone()
                .filter(|c| !c.is_empty())
                .unwrap_or_else(|| "unknown".to_string()),
        }
    }
}

/// Mobile is checked before tablet; anything else is desktop.
pub fn classify_device(user_agent: &str) -> DeviceType {
    let ua = user_agent.to_ascii_lowercase();
    if ua.contains("mobi") || ua.contains("android") {
        DeviceType::Mobile
    } else if ua.contains("tablet") || ua.contains("ipad") {
        DeviceType::Tablet
    } else {
        DeviceType::Desktop
    }
}

fn first_match(user_agent: &str, candidates: &[(&str, &str)]) -> String {
    candidates
        .iter()
        .find(|(needle, _)| user_agent.contains(needle))
        .map(|(_, label)| label.to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

impl UtmParams {
    /// Extract attribution from a page URL. Missing or empty parameters stay
    /// `None`; an unparseable URL yields no attribution.
    pub fn from_url(page_url: &str) -> Self {
        let Ok(url) = Url::parse(page_url) else {
            return Self::default();
        };
        let mut params = Self::default();
        for (key, value) in url.query_pairs() {
            if value.is_empty() {
                continue;
            }
            let slot = match key.as_ref() {
                "utm_source" => &mut params.utm_source,
                "utm_medium" => &mut params.utm_medium,
                "utm_campaign" => &mut params.utm_campaign,
                "utm_term" => &mut params.utm_term,
                "utm_content" => &mut params.utm_content,
                _ => continue,
            };
            if slot.is_none() {
                *slot = Some(value.into_owned());
            }
        }
        params
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const IPHONE: &str = "Mozilla/5.0 (iPhone; CPU iPhone OS 17_0 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.0 Mobile/15E148 Safari/604.1";
    const IPAD: &str = "Mozilla/5.0 (iPad; CPU OS 17_0 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.0 Safari/604.1";
    const WINDOWS_CHROME: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0 Safari/537.36";
    const LINUX_FIREFOX: &str = "Mozilla/5.0 (X11; Linux x86_64; rv:121.0) Gecko/20100101 Firefox/121.0";

    #[test]
    fn test_device_classification_order() {
        assert_eq!(classify_device(IPHONE), DeviceType::Mobile);
        assert_eq!(classify_device(IPAD), DeviceType::Tablet);
        assert_eq!(classify_device(WINDOWS_CHROME), DeviceType::Desktop);
        assert_eq!(classify_device("Mozilla/5.0 (Linux; Android 14)"), DeviceType::Mobile);
    }

    #[test]
    fn test_browser_and_os_first_match() {
        let ctx = NavigationContext {
            user_agent: WINDOWS_CHROME.into(),
            ..Default::default()
        };
        let snapshot = DeviceSnapshot::capture(&ctx);
        // Chrome UAs also mention Safari; Chrome is listed first.
        assert_eq!(snapshot.browser, "Chrome");
        assert_eq!(snapshot.os, "Windows");
        assert_eq!(snapshot.connection_type, "unknown");

        let ctx = NavigationContext {
            user_agent: LINUX_FIREFOX.into(),
            connection_type: Some("4g".into()),
            ..Default::default()
        };
        let snapshot = DeviceSnapshot::capture(&ctx);
        assert_eq!(snapshot.browser, "Firefox");
        assert_eq!(snapshot.os, "Linux");
        assert_eq!(snapshot.connection_type, "4g");

        // iPhone UAs contain "Mac OS X", which matches before iOS.
        let snapshot = DeviceSnapshot::capture(&NavigationContext {
            user_agent: IPHONE.into(),
            ..Default::default()
        });
        assert_eq!(snapshot.os, "MacOS");
        assert_eq!(snapshot.browser, "Safari");
    }

    #[test]
    fn test_unknown_user_agent() {
        let snapshot = DeviceSnapshot::capture(&NavigationContext {
            user_agent: "curl/8.0".into(),
            ..Default::default()
        });
        assert_eq!(snapshot.browser, "unknown");
        assert_eq!(snapshot.os, "unknown");
        assert_eq!(snapshot.device_type, DeviceType::Desktop);
    }

    #[test]
    fn test_utm_extraction() {
        let utm = UtmParams::from_url(
            "https://shop.example/?utm_source=newsletter&utm_medium=email&utm_campaign=printemps&utm_term=&ref=x",
        );
        assert_eq!(utm.utm_source.as_deref(), Some("newsletter"));
        assert_eq!(utm.utm_medium.as_deref(), Some("email"));
        assert_eq!(utm.utm_campaign.as_deref(), Some("printemps"));
        assert_eq!(utm.utm_term, None);
        assert_eq!(utm.utm_content, None);

        assert_eq!(UtmParams::from_url("not a url"), UtmParams::default());
    }
}
