//! 配置校验模块
//!
//! 校验规则：
//! - 字段范围 (validator derive 规则)
//! - worker_count 不超过 max_handles
//! - wal_scan_limit 不小于 queue_capacity
//! - poll_timeout_ms 不超过一小时

use contracts::{ContractError, PushConfig};
use validator::Validate;

/// Longest accepted long-poll timeout
pub const MAX_POLL_TIMEOUT_MS: u64 = 60 * 60 * 1000;

/// 校验 PushConfig 配置
///
/// 返回第一个遇到的错误，或 Ok(())。
pub fn validate(config: &PushConfig) -> Result<(), ContractError> {
    validate_ranges(config)?;
    validate_workers(config)?;
    validate_wal_scan(config)?;
    validate_poll_timeout(config)?;
    Ok(())
}

/// 字段范围校验，按字段名排序后报告第一个错误
fn validate_ranges(config: &PushConfig) -> Result<(), ContractError> {
    let Err(errors) = config.validate() else {
        return Ok(());
    };

    let field_errors = errors.field_errors();
    let mut fields: Vec<_> = field_errors.iter().collect();
    fields.sort_by_key(|(field, _)| field.to_string());

    let Some((field, errs)) = fields.first() else {
        return Err(ContractError::config_validation("config", errors.to_string()));
    };
    let message = errs
        .iter()
        .map(|e| {
            e.message
                .as_ref()
                .map(|m| m.to_string())
                .unwrap_or_else(|| e.code.to_string())
        })
        .collect::<Vec<_>>()
        .join("; ");
    Err(ContractError::config_validation(field.to_string(), message))
}

/// Workers beyond the handle limit could never receive a job
fn validate_workers(config: &PushConfig) -> Result<(), ContractError> {
    if config.worker_count > config.max_handles {
        return Err(ContractError::config_validation(
            "worker_count",
            format!(
                "worker_count ({}) must be <= max_handles ({})",
                config.worker_count, config.max_handles
            ),
        ));
    }
    Ok(())
}

/// 队列满后的缺口要能在一次 WAL 扫描中补齐
fn validate_wal_scan(config: &PushConfig) -> Result<(), ContractError> {
    if config.wal_scan_limit < config.queue_capacity {
        return Err(ContractError::config_validation(
            "wal_scan_limit",
            format!(
                "wal_scan_limit ({}) must be >= queue_capacity ({})",
                config.wal_scan_limit, config.queue_capacity
            ),
        ));
    }
    Ok(())
}

fn validate_poll_timeout(config: &PushConfig) -> Result<(), ContractError> {
    if config.poll_timeout_ms > MAX_POLL_TIMEOUT_MS {
        return Err(ContractError::config_validation(
            "poll_timeout_ms",
            format!(
                "poll_timeout_ms ({}) must be <= {MAX_POLL_TIMEOUT_MS}",
                config.poll_timeout_ms
            ),
        ));
    }
    Ok(())
}
