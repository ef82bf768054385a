//! 配置解析模块
//!
//! 支持 TOML (主要) 和 JSON (可选) 格式。
//!
//! 两种格式先读成同一棵文档树，再做两件事：
//! - policy `kind` 归一化：大小写不敏感，并接受探测器侧沿用的模式名
//!   (`send_every_nth`、`strides`、`time` …)
//! - 结构错误定位到具体的 output / upstream，未知字段按名字报告

use contracts::{ContractError, OutputConfig, RepeaterConfig, UpstreamConfig};
use serde::Deserialize;
use serde_json::Value;

/// 配置文件格式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    /// TOML 格式 (推荐)
    Toml,
    /// JSON 格式
    Json,
}

impl ConfigFormat {
    /// 从文件扩展名推断格式
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "toml" => Some(Self::Toml),
            "json" => Some(Self::Json),
            _ => None,
        }
    }
}

/// 解析 TOML 格式配置
pub fn parse_toml(content: &str) -> Result<RepeaterConfig, ContractError> {
    let document: Value = toml::from_str(content).map_err(|e| ContractError::ConfigParse {
        message: format!("TOML parse error: {e}"),
        source: Some(Box::new(e)),
    })?;
    from_document(document)
}

/// 解析 JSON 格式配置
pub fn parse_json(content: &str) -> Result<RepeaterConfig, ContractError> {
    let document: Value = serde_json::from_str(content).map_err(|e| ContractError::ConfigParse {
        message: format!("JSON parse error: {e}"),
        source: Some(Box::new(e)),
    })?;
    from_document(document)
}

/// 根据格式解析配置
pub fn parse(content: &str, format: ConfigFormat) -> Result<RepeaterConfig, ContractError> {
    match format {
        ConfigFormat::Toml => parse_toml(content),
        ConfigFormat::Json => parse_json(content),
    }
}

/// Canonical policy kind for a mode name, if it is one we know
pub fn canonical_policy_kind(kind: &str) -> Option<&'static str> {
    match kind.trim().to_ascii_lowercase().replace('-', "_").as_str() {
        "every_nth" | "send_every_nth" => Some("every_nth"),
        "stride" | "strides" => Some("stride"),
        "block" | "blocks" | "every_nth_block" => Some("block"),
        "throttle" | "time" => Some("throttle"),
        _ => None,
    }
}

fn from_document(mut document: Value) -> Result<RepeaterConfig, ContractError> {
    normalize_policy_kinds(&mut document);
    RepeaterConfig::deserialize(&document).map_err(|e| ContractError::ConfigParse {
        message: format!("{}{e}", locate_error(&document)),
        source: Some(Box::new(e)),
    })
}

/// Rewrite known policy mode names to their canonical `kind`
///
/// Unknown names are left alone so the error names them verbatim.
fn normalize_policy_kinds(document: &mut Value) {
    let Some(outputs) = document.get_mut("outputs").and_then(Value::as_array_mut) else {
        return;
    };
    for output in outputs {
        let Some(kind) = output.get_mut("policy").and_then(|policy| policy.get_mut("kind")) else {
            continue;
        };
        if let Some(canonical) = kind.as_str().and_then(canonical_policy_kind) {
            *kind = Value::from(canonical);
        }
    }
}

/// Prefix naming the section that failed to deserialize (empty for top level)
fn locate_error(document: &Value) -> String {
    let outputs = document.get("outputs").and_then(Value::as_array);
    let failing_output = outputs.into_iter().flatten().enumerate().find(|(_, output)| {
        OutputConfig::deserialize(*output).is_err()
    });
    if let Some((idx, output)) = failing_output {
        return match output.get("name").and_then(Value::as_str) {
            Some(name) => format!("outputs[{idx}] '{name}': "),
            None => format!("outputs[{idx}]: "),
        };
    }

    match document.get("upstream") {
        Some(upstream) if UpstreamConfig::deserialize(upstream).is_err() => "upstream: ".to_string(),
        _ => String::new(),
    }
}
