//! SQLite 行映射辅助函数
//!
//! 复杂字段（调度配置、目标范围、参数、结果等）以 JSON 文本存储。

use serde::de::DeserializeOwned;
use serde::Serialize;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use automator_core::{AutomatorError, Result};

pub struct MappingHelpers;

impl MappingHelpers {
    pub fn to_json<T: Serialize>(value: &T, field_name: &str) -> Result<String> {
        serde_json::to_string(value)
            .map_err(|e| AutomatorError::Serialization(format!("序列化字段 {field_name} 失败: {e}")))
    }

    pub fn to_optional_json<T: Serialize>(value: Option<&T>, field_name: &str) -> Result<Option<String>> {
        value.map(|v| Self::to_json(v, field_name)).transpose()
    }

    pub fn parse_json<T: DeserializeOwned>(row: &SqliteRow, field_name: &str) -> Result<T> {
        let json_str: String = row.try_get(field_name)?;
        serde_json::from_str(&json_str)
            .map_err(|e| AutomatorError::Serialization(format!("解析字段 {field_name} 失败: {e}")))
    }

    pub fn parse_optional_json<T: DeserializeOwned>(
        row: &SqliteRow,
        field_name: &str,
    ) -> Result<Option<T>> {
        match row.try_get::<Option<String>, _>(field_name)? {
            Some(json_str) => serde_json::from_str(&json_str).map(Some).map_err(|e| {
                AutomatorError::Serialization(format!("解析字段 {field_name} 失败: {e}"))
            }),
            None => Ok(None),
        }
    }

    /// 以 i64 存储的非负整数
    pub fn parse_u32(row: &SqliteRow, field_name: &str) -> Result<u32> {
        let value: i64 = row.try_get(field_name)?;
        u32::try_from(value)
            .map_err(|_| AutomatorError::Serialization(format!("字段 {field_name} 超出范围: {value}")))
    }

    pub fn parse_u64(row: &SqliteRow, field_name: &str) -> Result<u64> {
        let value: i64 = row.try_get(field_name)?;
        u64::try_from(value)
            .map_err(|_| AutomatorError::Serialization(format!("字段 {field_name} 超出范围: {value}")))
    }

    pub fn to_i64(value: u64) -> i64 {
        i64::try_from(value).unwrap_or(i64::MAX)
    }

    /// 生成 `?, ?, ?` 形式的占位符
    pub fn placeholders(count: usize) -> String {
        vec!["?"; count].join(", ")
    }
}
