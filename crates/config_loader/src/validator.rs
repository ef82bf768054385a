//! 配置校验模块
//!
//! 校验规则：
//! - 字段级约束 (validator derive)：数值参数 >= 1、名称非空
//! - 至少一个 output
//! - output name 唯一，port 唯一
//! - policy 参数 >= 1，throttle 间隔不超过一天
//! - upstream address 形如 `tcp://host:port` 或 `ipc:///path`

use std::collections::HashSet;

use contracts::{ContractError, OutputPattern, PolicyConfig, RepeaterConfig};
use validator::{Validate, ValidationErrors, ValidationErrorsKind};

/// Upper bound for `throttle.seconds`
pub const MAX_THROTTLE_SECONDS: u64 = 86_400;

/// Transports the socket layer can connect over (no in-process transport)
const SUPPORTED_PROTOCOLS: [&str; 2] = ["tcp", "ipc"];

/// 校验 RepeaterConfig 配置
///
/// 返回第一个遇到的错误，或 Ok(())。
pub fn validate(config: &RepeaterConfig) -> Result<(), ContractError> {
    validate_outputs_present(config)?;
    validate_fields(config)?;
    validate_output_names(config)?;
    validate_output_ports(config)?;
    validate_policies(config)?;
    validate_upstream_address(&config.upstream.address)?;
    warn_pub_writer(config);
    Ok(())
}

/// 至少一个 output
fn validate_outputs_present(config: &RepeaterConfig) -> Result<(), ContractError> {
    if config.outputs.is_empty() {
        return Err(ContractError::config_validation(
            "outputs",
            "at least one output is required",
        ));
    }
    Ok(())
}

/// 字段级约束
fn validate_fields(config: &RepeaterConfig) -> Result<(), ContractError> {
    config.validate().map_err(|errors| {
        let (field, message) = first_field_error(&errors, String::new())
            .unwrap_or_else(|| ("config".to_string(), errors.to_string()));
        ContractError::config_validation(field, message)
    })
}

/// Walk nested validation errors in a stable order, returning the first leaf
fn first_field_error(errors: &ValidationErrors, prefix: String) -> Option<(String, String)> {
    let mut fields: Vec<_> = errors.errors().iter().collect();
    fields.sort_by(|a, b| a.0.cmp(b.0));

    for (name, kind) in fields {
        let path = if prefix.is_empty() {
            name.to_string()
        } else {
            format!("{prefix}.{name}")
        };
        let found = match kind {
            ValidationErrorsKind::Field(list) => list.first().map(|e| {
                let message = match &e.message {
                    Some(message) => message.to_string(),
                    None => format!("constraint '{}' violated", e.code),
                };
                (path.clone(), message)
            }),
            ValidationErrorsKind::Struct(inner) => first_field_error(inner, path.clone()),
            ValidationErrorsKind::List(items) => items
                .iter()
                .find_map(|(idx, inner)| first_field_error(inner, format!("{path}[{idx}]"))),
        };
        if found.is_some() {
            return found;
        }
    }
    None
}

/// 校验 output name 唯一性
fn validate_output_names(config: &RepeaterConfig) -> Result<(), ContractError> {
    let mut seen = HashSet::new();
    for output in &config.outputs {
        if !seen.insert(output.name.as_str()) {
            return Err(ContractError::config_validation(
                format!("outputs[name={}]", output.name),
                "duplicate output name",
            ));
        }
    }
    Ok(())
}

/// 校验 port 唯一性
fn validate_output_ports(config: &RepeaterConfig) -> Result<(), ContractError> {
    let mut seen = HashSet::new();
    for output in &config.outputs {
        if !seen.insert(output.port) {
            return Err(ContractError::config_validation(
                format!("outputs[{}].port", output.name),
                format!("duplicate port {}", output.port),
            ));
        }
    }
    Ok(())
}

/// 校验 policy 参数
fn validate_policies(config: &RepeaterConfig) -> Result<(), ContractError> {
    for output in &config.outputs {
        let parameter = output.policy.parameter();
        if parameter == 0 {
            return Err(ContractError::config_validation(
                format!("outputs[{}].policy", output.name),
                format!("{} parameter must be >= 1", output.policy.kind()),
            ));
        }
        if let PolicyConfig::Throttle { seconds } = output.policy {
            if seconds > MAX_THROTTLE_SECONDS {
                return Err(ContractError::config_validation(
                    format!("outputs[{}].policy.seconds", output.name),
                    format!("throttle interval must be <= {MAX_THROTTLE_SECONDS}s, got {seconds}"),
                ));
            }
        }
    }
    Ok(())
}

/// 校验 upstream address 格式
pub fn validate_upstream_address(address: &str) -> Result<(), ContractError> {
    let invalid = |message: String| ContractError::config_validation("upstream.address", message);

    let (protocol, rest) = address
        .split_once("://")
        .ok_or_else(|| invalid(format!("'{address}' is not of the form <proto>://<host>:<port>")))?;

    if !SUPPORTED_PROTOCOLS.contains(&protocol) {
        return Err(invalid(format!(
            "unsupported protocol '{protocol}' (expected one of {})",
            SUPPORTED_PROTOCOLS.join(", ")
        )));
    }
    if rest.is_empty() {
        return Err(invalid(format!("'{address}' has no endpoint")));
    }
    if protocol != "tcp" {
        return Ok(());
    }

    let (host, port) = rest
        .rsplit_once(':')
        .ok_or_else(|| invalid(format!("'{address}' is missing a port")))?;
    if host.is_empty() {
        return Err(invalid(format!("'{address}' is missing a host")));
    }
    match port.parse::<u16>() {
        Ok(port) if port > 0 => Ok(()),
        _ => Err(invalid(format!("'{port}' is not a valid port"))),
    }
}

/// PUB drops frames while no subscriber is connected, which a file writer never wants
fn warn_pub_writer(config: &RepeaterConfig) {
    for output in &config.outputs {
        if output.is_writer() && output.pattern == OutputPattern::Pub {
            tracing::warn!(
                output = %output.name,
                "writer output uses PUB; frames sent before the writer subscribes are lost"
            );
        }
    }
}
