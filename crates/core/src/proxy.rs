use std::env;

use tracing::warn;

const HTTP_PROXY_VARS: [&str; 2] = ["HTTP_PROXY", "http_proxy"];
const HTTPS_PROXY_VARS: [&str; 2] = ["HTTPS_PROXY", "https_proxy"];
const ALL_PROXY_VARS: [&str; 2] = ["ALL_PROXY", "all_proxy"];
const UNSUPPORTED_SCHEMES: [&str; 3] = ["socks://", "socks5://", "socks5h://"];

/// Proxy endpoints the backend client should use, read once from the process
/// environment. SOCKS endpoints are dropped because the HTTP client is built
/// without SOCKS support; the environment itself is left untouched.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ProxySettings {
    pub http: Option<String>,
    pub https: Option<String>,
    pub all: Option<String>,
    pub dropped: Vec<&'static str>,
}

impl ProxySettings {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut settings = Self::default();
        settings.http = settings.pick(&HTTP_PROXY_VARS, &lookup);
        settings.https = settings.pick(&HTTPS_PROXY_VARS, &lookup);
        settings.all = settings.pick(&ALL_PROXY_VARS, &lookup);
        settings
    }

    pub fn is_empty(&self) -> bool {
        self.http.is_none() && self.https.is_none() && self.all.is_none()
    }

    fn pick(
        &mut self,
        vars: &[&'static str],
        lookup: &impl Fn(&str) -> Option<String>,
    ) -> Option<String> {
        let mut chosen = None;
        for var in vars {
            let Some(value) = lookup(var).filter(|value| !value.trim().is_empty()) else {
                continue;
            };
            if is_unsupported_scheme(&value) {
                warn!(
                    event_name = "config.proxy_dropped",
                    variable = *var,
                    "ignoring proxy with unsupported scheme"
                );
                self.dropped.push(*var);
                continue;
            }
            if chosen.is_none() {
                chosen = Some(value);
            }
        }
        chosen
    }
}

fn is_unsupported_scheme(value: &str) -> bool {
    let lowered = value.trim().to_ascii_lowercase();
    UNSUPPORTED_SCHEMES.iter().any(|scheme| lowered.starts_with(scheme))
}
