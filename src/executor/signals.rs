//! Page signals that tell the selector a fetch did not really succeed
//!
//! A 200 response can still be a CAPTCHA wall, an anti-bot interstitial, or an
//! empty JavaScript shell. These helpers inspect markup and status codes and
//! report what they see; the adaptive profile learns from the result.

use crate::KumoError;
use scraper::{Html, Selector};

/// Visible text below this length, with scripts present, marks a JS shell
const JS_SHELL_MIN_TEXT: usize = 50;

const CAPTCHA_MARKERS: &[&str] = &[
    "g-recaptcha",
    "h-captcha",
    "cf-turnstile",
    "recaptcha/api.js",
    "hcaptcha.com/1/api.js",
];

const CAPTCHA_FRAME_SELECTOR: &str =
    "iframe[src*='recaptcha'], iframe[src*='hcaptcha'], iframe[src*='turnstile'], iframe[title*='captcha'], iframe[title*='CAPTCHA']";

const ANTIBOT_MARKERS: &[&str] = &[
    "cf-chl",
    "just a moment",
    "access denied",
    "attention required",
    "ddos protection",
];

/// Appended to error reasons when a blocking response is a challenge page
pub(crate) const ANTIBOT_HINT: &str = "anti-bot challenge";

/// What a single fetch revealed about the site
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PageSignals {
    pub anti_bot: bool,
    pub requires_js: bool,
    pub rate_limit: bool,
    pub captcha: bool,
}

impl PageSignals {
    /// Inspects a response status and body
    pub fn inspect(status: u16, html: &str) -> Self {
        Self {
            anti_bot: detect_antibot(status, html),
            requires_js: is_js_shell(html),
            rate_limit: status == 429,
            captcha: detect_captcha(html),
        }
    }

    /// Infers signals from a failed fetch
    pub fn from_error(error: &KumoError) -> Self {
        match error {
            KumoError::Network {
                status: Some(429), ..
            } => Self {
                rate_limit: true,
                ..Self::default()
            },
            KumoError::Network {
                status: Some(code),
                reason,
                ..
            } => Self {
                anti_bot: *code == 403 || reason.contains(ANTIBOT_HINT),
                ..Self::default()
            },
            KumoError::CaptchaDetected { .. } => Self {
                captcha: true,
                ..Self::default()
            },
            _ => Self::default(),
        }
    }

    pub fn any(&self) -> bool {
        self.anti_bot || self.requires_js || self.rate_limit || self.captcha
    }

    /// Combines two observations, keeping every detected signal
    pub fn merge(self, other: PageSignals) -> Self {
        Self {
            anti_bot: self.anti_bot || other.anti_bot,
            requires_js: self.requires_js || other.requires_js,
            rate_limit: self.rate_limit || other.rate_limit,
            captcha: self.captcha || other.captcha,
        }
    }
}

/// Returns true if the markup contains a known CAPTCHA widget
pub fn detect_captcha(html: &str) -> bool {
    let lowered = html.to_lowercase();
    if CAPTCHA_MARKERS.iter().any(|m| lowered.contains(m)) {
        return true;
    }

    let document = Html::parse_document(html);
    match Selector::parse(CAPTCHA_FRAME_SELECTOR) {
        Ok(selector) => document.select(&selector).next().is_some(),
        Err(_) => false,
    }
}

/// Returns true if the response looks like an anti-bot interstitial
///
/// Only 403 and 503 responses are inspected; challenge pages use those codes.
pub fn detect_antibot(status: u16, html: &str) -> bool {
    if status != 403 && status != 503 {
        return false;
    }
    let lowered = html.to_lowercase();
    ANTIBOT_MARKERS.iter().any(|m| lowered.contains(m))
}

/// Length of the text a reader would see, ignoring scripts and styles
pub fn visible_text_len(html: &str) -> usize {
    let document = Html::parse_document(html);
    let Ok(body) = Selector::parse("body") else {
        return 0;
    };

    document
        .select(&body)
        .next()
        .map(|root| {
            root.descendants()
                .filter_map(|node| {
                    let text = node.value().as_text()?;
                    let inside_script = node.ancestors().any(|a| {
                        a.value()
                            .as_element()
                            .map(|e| matches!(e.name(), "script" | "style" | "noscript" | "template"))
                            .unwrap_or(false)
                    });
                    (!inside_script).then(|| text.trim().chars().count())
                })
                .sum()
        })
        .unwrap_or(0)
}

/// Returns true if the page is a script-driven shell with almost no text
pub fn is_js_shell(html: &str) -> bool {
    let document = Html::parse_document(html);
    let has_scripts = Selector::parse("script")
        .map(|s| document.select(&s).next().is_some())
        .unwrap_or(false);

    has_scripts && visible_text_len(html) < JS_SHELL_MIN_TEXT
}
