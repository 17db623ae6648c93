use crate::config::AuthConfig;

/// Ordered selector lists used by the form login flow
///
/// Every list is tried front to back and the first visible match wins.
/// Selectors from the auth configuration are placed in front of the
/// built-in lists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginSelectors {
    /// Controls that open a login modal or reveal the form; only clicked when
    /// no username field is visible yet
    pub triggers: Vec<String>,
    pub username: Vec<String>,
    pub password: Vec<String>,
    pub submit: Vec<String>,
    /// Elements whose presence after submitting means the login was rejected
    pub error_indicators: Vec<String>,
}

const TRIGGERS: &[&str] = &[
    "a[href*='login']",
    "button[class*='login']",
    "[data-target*='login']",
    ".login-link",
    "a[href*='signin']",
    "button[class*='signin']",
];

const USERNAME: &[&str] = &[
    "input[type='email']",
    "input[name='email']",
    "input[name='username']",
    "input[name='user']",
    "input[name='login']",
    "input[id*='user']",
    "input[id*='email']",
    "input[autocomplete='username']",
];

const PASSWORD: &[&str] = &[
    "input[type='password']",
    "input[name='password']",
    "input[name='pass']",
    "input[id*='pass']",
    "input[autocomplete='current-password']",
];

const SUBMIT: &[&str] = &[
    "button[type='submit']",
    "input[type='submit']",
    "button[name='login']",
    "button[id*='login']",
    ".login-submit",
];

const ERROR_INDICATORS: &[&str] = &[
    ".error",
    ".alert-danger",
    ".login-error",
    "[role='alert']",
    "#error-message",
];

fn owned(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

fn prepend(preferred: Option<&String>, mut fallback: Vec<String>) -> Vec<String> {
    if let Some(selector) = preferred.map(|s| s.trim()).filter(|s| !s.is_empty()) {
        fallback.retain(|s| s != selector);
        fallback.insert(0, selector.to_string());
    }
    fallback
}

impl Default for LoginSelectors {
    fn default() -> Self {
        Self {
            triggers: owned(TRIGGERS),
            username: owned(USERNAME),
            password: owned(PASSWORD),
            submit: owned(SUBMIT),
            error_indicators: owned(ERROR_INDICATORS),
        }
    }
}

impl LoginSelectors {
    /// Built-in lists with the configured selectors tried first
    pub fn for_config(config: &AuthConfig) -> Self {
        let defaults = Self::default();
        Self {
            triggers: prepend(config.login_trigger.as_ref(), defaults.triggers),
            username: prepend(config.username_field.as_ref(), defaults.username),
            password: prepend(config.password_field.as_ref(), defaults.password),
            submit: prepend(config.submit_button.as_ref(), defaults.submit),
            error_indicators: defaults.error_indicators,
        }
    }
}
