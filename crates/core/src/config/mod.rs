//! 配置管理
//!
//! 配置按以下顺序叠加，后者覆盖前者：
//!
//! 1. 内置默认值（每个配置段都实现了 `Default`）
//! 2. TOML 配置文件
//! 3. 以 `AUTOMATOR_` 为前缀、`__` 分隔层级的环境变量，
//!    例如 `AUTOMATOR_ENGINE__MAX_PARALLEL=32`
//!
//! 加载完成后每个配置段都会经过 [`ConfigValidator::validate`] 校验。

pub mod models;

pub use models::*;

use crate::errors::Result;

/// 配置段校验
pub trait ConfigValidator {
    fn validate(&self) -> Result<()>;
}
