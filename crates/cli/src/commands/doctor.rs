use rehabdesk_agent::anthropic::AnthropicBackend;
use rehabdesk_core::config::{LoadOptions, ResolvedConfig, RuntimeConfig};
use rehabdesk_core::proxy::ProxySettings;
use reqwest::Url;
use serde::Serialize;

use crate::commands::CommandResult;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum CheckStatus {
    Pass,
    Fail,
    Skipped,
}

#[derive(Debug, Serialize)]
struct DoctorCheck {
    name: &'static str,
    status: CheckStatus,
    details: String,
}

#[derive(Debug, Serialize)]
struct DoctorReport {
    overall_status: CheckStatus,
    summary: String,
    checks: Vec<DoctorCheck>,
}

pub fn run(options: LoadOptions, json_output: bool) -> CommandResult {
    let report = build_report(RuntimeConfig::resolve(options), ProxySettings::from_env());
    let exit_code = if report.overall_status == CheckStatus::Fail { 1 } else { 0 };

    if json_output {
        let output = serde_json::to_string_pretty(&report).unwrap_or_else(|error| {
            format!(
                "{{\"overall_status\":\"fail\",\"summary\":\"doctor serialization failed\",\"error\":\"{}\"}}",
                escape_json(&error.to_string())
            )
        });
        return CommandResult { exit_code, output };
    }

    CommandResult { exit_code, output: render_human(&report) }
}

fn build_report(resolved: ResolvedConfig, proxy: ProxySettings) -> DoctorReport {
    let checks = vec![
        check_config_file(&resolved),
        check_api_key(&resolved.config),
        check_base_url(&resolved.config),
        check_proxy(&proxy),
        check_backend_client(&resolved.config, &proxy),
    ];

    let healthy = checks.iter().all(|check| check.status != CheckStatus::Fail);
    let overall_status = if healthy { CheckStatus::Pass } else { CheckStatus::Fail };
    let summary = if healthy {
        "doctor: all readiness checks passed".to_string()
    } else {
        "doctor: one or more readiness checks failed".to_string()
    };

    DoctorReport { overall_status, summary, checks }
}

fn check_config_file(resolved: &ResolvedConfig) -> DoctorCheck {
    let name = "config_file";
    if let Some(warning) = resolved.warnings.first() {
        return DoctorCheck { name, status: CheckStatus::Fail, details: warning.to_string() };
    }
    match &resolved.file_path {
        Some(path) => DoctorCheck {
            name,
            status: CheckStatus::Pass,
            details: format!("loaded `{}`", path.display()),
        },
        None => DoctorCheck {
            name,
            status: CheckStatus::Skipped,
            details: "no config file found, using defaults and environment".to_string(),
        },
    }
}

fn check_api_key(config: &RuntimeConfig) -> DoctorCheck {
    if config.has_api_key() {
        DoctorCheck { name: "api_key", status: CheckStatus::Pass, details: "api key configured".to_string() }
    } else {
        DoctorCheck {
            name: "api_key",
            status: CheckStatus::Fail,
            details: "no api key; set ANTHROPIC_API_KEY or api_key in the config file".to_string(),
        }
    }
}

fn check_base_url(config: &RuntimeConfig) -> DoctorCheck {
    match Url::parse(config.base_url.trim()) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => DoctorCheck {
            name: "base_url",
            status: CheckStatus::Pass,
            details: format!("`{url}`"),
        },
        Ok(url) => DoctorCheck {
            name: "base_url",
            status: CheckStatus::Fail,
            details: format!("unsupported scheme `{}`", url.scheme()),
        },
        Err(error) => DoctorCheck {
            name: "base_url",
            status: CheckStatus::Fail,
            details: format!("`{}` is not a valid URL: {error}", config.base_url),
        },
    }
}

fn check_proxy(proxy: &ProxySettings) -> DoctorCheck {
    let mut details = Vec::new();
    for (scheme, value) in [("http", &proxy.http), ("https", &proxy.https), ("all", &proxy.all)] {
        if let Some(value) = value {
            details.push(format!("{scheme} via `{value}`"));
        }
    }
    if !proxy.dropped.is_empty() {
        details.push(format!("ignored SOCKS proxy from {}", proxy.dropped.join(", ")));
    }
    if details.is_empty() {
        return DoctorCheck {
            name: "proxy",
            status: CheckStatus::Skipped,
            details: "no proxy configured".to_string(),
        };
    }
    DoctorCheck { name: "proxy", status: CheckStatus::Pass, details: details.join("; ") }
}

fn check_backend_client(config: &RuntimeConfig, proxy: &ProxySettings) -> DoctorCheck {
    match AnthropicBackend::new(config, proxy) {
        Ok(backend) => DoctorCheck {
            name: "backend_client",
            status: CheckStatus::Pass,
            details: format!("requests go to `{}`", backend.endpoint()),
        },
        Err(error) => {
            DoctorCheck { name: "backend_client", status: CheckStatus::Fail, details: error.to_string() }
        }
    }
}

fn render_human(report: &DoctorReport) -> String {
    let mut lines = Vec::new();
    lines.push(report.summary.clone());

    for check in &report.checks {
        let marker = match check.status {
            CheckStatus::Pass => "ok",
            CheckStatus::Fail => "fail",
            CheckStatus::Skipped => "skip",
        };
        lines.push(format!("- [{marker}] {}: {}", check.name, check.details));
    }

    lines.join("\n")
}

fn escape_json(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}
