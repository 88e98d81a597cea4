use rehabdesk_core::config::{LoadOptions, LogFormat, RuntimeConfig};
use secrecy::ExposeSecret;

pub fn run(options: LoadOptions) -> String {
    let resolved = RuntimeConfig::resolve(options);
    let config = &resolved.config;

    let mut lines =
        vec!["effective config (source precedence: override > env > file > default):".to_string()];

    let config_file = resolved
        .file_path
        .as_ref()
        .map(|path| path.display().to_string())
        .unwrap_or_else(|| "<none found>".to_string());
    lines.push(format!("- config_file = {config_file}"));

    let fields = [
        ("api_key", redact_token(config.api_key.expose_secret())),
        ("base_url", config.base_url.clone()),
        ("model", config.model.clone()),
        ("max_tokens", config.max_tokens.to_string()),
        ("max_image_bytes", config.max_image_bytes.to_string()),
        ("response_language", config.response_language.clone()),
        ("log_level", config.logging.level.clone()),
        ("log_format", log_format_name(config.logging.format).to_string()),
    ];
    for (key, value) in fields {
        lines.push(render_line(key, &value, resolved.source_of(key).to_string()));
    }

    for warning in &resolved.warnings {
        lines.push(format!("warning: {warning}"));
    }

    lines.join("\n")
}

fn render_line(key: &str, value: &str, source: String) -> String {
    format!("- {key} = {value} (source: {source})")
}

fn log_format_name(format: LogFormat) -> &'static str {
    match format {
        LogFormat::Compact => "compact",
        LogFormat::Pretty => "pretty",
        LogFormat::Json => "json",
    }
}

fn redact_token(token: &str) -> String {
    let trimmed = token.trim();
    if trimmed.is_empty() {
        return "<unset>".to_string();
    }

    if let Some((prefix, _)) = trimmed.split_once('-') {
        return format!("{prefix}-***");
    }

    "<redacted>".to_string()
}
