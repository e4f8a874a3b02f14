//! JSON-body and CLI override application, mirroring the layering order of the
//! original `ApplyJsonConfig` / `ApplyCliOverrides` (`examples/original_source/src/config.cpp`):
//! nested sections first, then legacy flat aliases, then CLI overrides on top of both.

use serde_json::Value;

use super::Config;

fn split_pairs(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_ascii_lowercase())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Apply a parsed JSON config document onto `config`, in place.
pub fn apply_json(config: &mut Config, value: &Value) {
    if let Some(pairs) = value.get("trade_pairs").and_then(Value::as_array) {
        let parsed: Vec<String> = pairs
            .iter()
            .filter_map(Value::as_str)
            .map(|s| s.to_ascii_lowercase())
            .filter(|s| !s.is_empty())
            .collect();
        if !parsed.is_empty() {
            config.trade_pairs = parsed;
        }
    }

    if let Some(ws) = value.get("ws").and_then(Value::as_object) {
        if let Some(v) = ws.get("host").and_then(Value::as_str) {
            config.ws.host = v.to_string();
        }
        if let Some(v) = ws.get("port").and_then(Value::as_str) {
            config.ws.port = v.to_string();
        }
        if let Some(v) = ws.get("handshake_timeout_sec").and_then(Value::as_i64) {
            config.ws.handshake_timeout_sec = v;
        }
        if let Some(v) = ws.get("idle_timeout_sec").and_then(Value::as_i64) {
            config.ws.idle_timeout_sec = v;
        }
    }

    if let Some(retry) = value.get("retry").and_then(Value::as_object) {
        if let Some(v) = retry.get("base_retry_sec").and_then(Value::as_i64) {
            config.retry.base_retry_sec = v;
        }
        if let Some(v) = retry.get("max_retry_sec").and_then(Value::as_i64) {
            config.retry.max_retry_sec = v;
        }
        if let Some(v) = retry.get("max_retry_attempts").and_then(Value::as_u64) {
            config.retry.max_retry_attempts = v as u32;
        }
    }

    if let Some(agg) = value.get("agg").and_then(Value::as_object) {
        if let Some(v) = agg.get("period_ms").and_then(Value::as_u64) {
            config.agg.period_ms = v;
        }
    }

    if let Some(output) = value.get("output").and_then(Value::as_object) {
        if let Some(v) = output.get("write_period_ms").and_then(Value::as_u64) {
            config.output.write_period_ms = v;
        }
        if let Some(v) = output.get("write_delay_ms").and_then(Value::as_u64) {
            config.output.write_delay_ms = v;
        }
        if let Some(v) = output.get("filename").and_then(Value::as_str) {
            config.output.filename = v.to_string();
        }
        if let Some(v) = output.get("max_file_mb").and_then(Value::as_u64) {
            config.output.max_file_mb = v;
        }
        if let Some(v) = output.get("max_files").and_then(Value::as_u64) {
            config.output.max_files = v;
        }
        if let Some(v) = output.get("console_report").and_then(Value::as_bool) {
            config.output.console_report = v;
        }
    }

    if let Some(logging) = value.get("logging").and_then(Value::as_object) {
        if let Some(v) = logging.get("level").and_then(Value::as_str) {
            config.logging.level = v.to_string();
        }
        if let Some(v) = logging.get("format").and_then(Value::as_str) {
            config.logging.format = v.to_string();
        }
    }

    // Legacy flat aliases, applied last so they win over the nested form, matching
    // `examples/original_source/src/config.cpp`, which applies them unconditionally
    // after the nested sections.
    if let Some(v) = value.get("agregate_period_ms").and_then(Value::as_u64) {
        config.agg.period_ms = v;
    }
    if let Some(v) = value.get("write_period_ms").and_then(Value::as_u64) {
        config.output.write_period_ms = v;
    }
    // `agregate_using_timestamp` is accepted for config-file compatibility but has no
    // wired effect: flush grace is always honored unconditionally.
    if let Some(v) = value.get("write_delay_ms").and_then(Value::as_u64) {
        config.output.write_delay_ms = v;
    }
    if let Some(v) = value.get("output_filename").and_then(Value::as_str) {
        config.output.filename = v.to_string();
    }
    if let Some(v) = value.get("max_file_mb").and_then(Value::as_u64) {
        config.output.max_file_mb = v;
    }
    if let Some(v) = value.get("max_files").and_then(Value::as_u64) {
        config.output.max_files = v;
    }
    if let Some(v) = value.get("console_report").and_then(Value::as_bool) {
        config.output.console_report = v;
    }
    if let Some(v) = value.get("base_retry_sec").and_then(Value::as_i64) {
        config.retry.base_retry_sec = v;
    }
    if let Some(v) = value.get("max_retry_sec").and_then(Value::as_i64) {
        config.retry.max_retry_sec = v;
    }
    if let Some(v) = value.get("max_retry_attempts").and_then(Value::as_u64) {
        config.retry.max_retry_attempts = v as u32;
    }
    if let Some(v) = value.get("ws_host").and_then(Value::as_str) {
        config.ws.host = v.to_string();
    }
    if let Some(v) = value.get("ws_port").and_then(Value::as_str) {
        config.ws.port = v.to_string();
    }
}

/// Apply a single raw `--dotted-key=value` (rendered `--section-key=value`) CLI token.
/// Returns an error string (not `crate::error::Error`, to keep this module free of
/// config-load-specific error context) if the key is unknown or the value doesn't
/// parse for its field's type.
pub fn apply_cli(config: &mut Config, raw: &str) -> Result<(), String> {
    let raw = raw
        .strip_prefix("--")
        .ok_or_else(|| format!("override `{raw}` must start with `--`"))?;
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("override `{raw}` must be `--key=value`"))?;

    match key {
        "trade-pairs" => config.trade_pairs = split_pairs(value),
        "ws-host" => config.ws.host = value.to_string(),
        "ws-port" => config.ws.port = value.to_string(),
        "ws-handshake-timeout-sec" => config.ws.handshake_timeout_sec = parse(key, value)?,
        "ws-idle-timeout-sec" => config.ws.idle_timeout_sec = parse(key, value)?,
        "retry-base-retry-sec" => config.retry.base_retry_sec = parse(key, value)?,
        "retry-max-retry-sec" => config.retry.max_retry_sec = parse(key, value)?,
        "retry-max-retry-attempts" => config.retry.max_retry_attempts = parse(key, value)?,
        "agg-period-ms" => config.agg.period_ms = parse(key, value)?,
        // Legacy no-op flag, accepted so existing invocations don't fail.
        "agg-use-timestamp" => {}
        "output-write-period-ms" => config.output.write_period_ms = parse(key, value)?,
        "output-write-delay-ms" => config.output.write_delay_ms = parse(key, value)?,
        "output-filename" => config.output.filename = value.to_string(),
        "output-max-file-mb" => config.output.max_file_mb = parse(key, value)?,
        "output-max-files" => config.output.max_files = parse(key, value)?,
        "output-console-report" => {
            config.output.console_report = matches!(value, "1" | "true" | "TRUE")
        }
        "logging-level" => config.logging.level = value.to_string(),
        "logging-format" => config.logging.format = value.to_string(),
        other => return Err(format!("unknown override key `{other}`")),
    }
    Ok(())
}

fn parse<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, String> {
    value
        .parse()
        .map_err(|_| format!("`{key}` override value `{value}` is not valid"))
}
