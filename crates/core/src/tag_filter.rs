//! 标签过滤器
//!
//! 过滤器以逗号分隔，每一项为 `名称` 或 `名称=值`，名称和值各自可以是：
//!
//! - `*` 匹配任意值
//! - `前缀*`、`*后缀`、`*包含*`
//! - 以 `\` 开头的正则表达式（从字符串开头匹配）
//! - 精确字符串
//! - 空串，只匹配空值
//!
//! 名称前加 `!` 表示名称不匹配，值前加 `!` 表示值不匹配；`名称=` 只比较名称。
//! 源串以 `\` 开头或包含 `=\` 时整体作为一项过滤器，不按逗号拆分。
//! 各项及名称、值两侧的空白会被去掉。
//!
//! 资源的任意一个标签匹配任意一项过滤器即视为匹配。

use std::collections::BTreeMap;

use regex::Regex;

use crate::errors::{AutomatorError, Result};

const FILTER_SEPARATOR: char = ',';
const NAME_VALUE_SEPARATOR: char = '=';
const REGEX_PREFIX: char = '\\';
const WILDCARD: &str = "*";
const NOT_OPERATOR: char = '!';

#[derive(Debug, Clone)]
enum Pattern {
    Empty,
    Any,
    Exact(String),
    Prefix(String),
    Suffix(String),
    Contains(String),
    Regex(Regex),
}

impl Pattern {
    fn parse(filter: &str, part: &str) -> Result<Self> {
        if part.is_empty() {
            return Ok(Pattern::Empty);
        }
        if let Some(expr) = part.strip_prefix(REGEX_PREFIX).filter(|e| !e.is_empty()) {
            let regex = Regex::new(&format!("^(?:{expr})")).map_err(|e| {
                AutomatorError::InvalidTagFilter {
                    filter: filter.to_string(),
                    message: e.to_string(),
                }
            })?;
            return Ok(Pattern::Regex(regex));
        }
        if part == WILDCARD {
            return Ok(Pattern::Any);
        }

        let pattern = match (part.strip_prefix(WILDCARD), part.strip_suffix(WILDCARD)) {
            (Some(rest), _) if rest.ends_with(WILDCARD) => {
                Pattern::Contains(rest[..rest.len() - WILDCARD.len()].to_string())
            }
            (Some(rest), _) => Pattern::Suffix(rest.to_string()),
            (None, Some(rest)) => Pattern::Prefix(rest.to_string()),
            (None, None) => Pattern::Exact(part.to_string()),
        };
        Ok(pattern)
    }

    fn matches(&self, s: &str) -> bool {
        match self {
            Pattern::Empty => s.is_empty(),
            Pattern::Any => true,
            Pattern::Exact(exact) => s == exact,
            Pattern::Prefix(prefix) => s.starts_with(prefix.as_str()),
            Pattern::Suffix(suffix) => s.ends_with(suffix.as_str()),
            Pattern::Contains(needle) => s.contains(needle.as_str()),
            Pattern::Regex(regex) => regex.is_match(s),
        }
    }
}

#[derive(Debug, Clone)]
struct TagFilter {
    name: Pattern,
    value: Option<Pattern>,
    not_tag: bool,
    not_equal: bool,
}

impl TagFilter {
    fn parse(source: &str, item: &str) -> Result<Self> {
        let (name, value) = match item.split_once(NAME_VALUE_SEPARATOR) {
            Some((name, value)) => (name.trim(), Some(value.trim())),
            None => (item.trim(), None),
        };

        let (name, not_tag) = match name.strip_prefix(NOT_OPERATOR) {
            Some(rest) => (rest.trim(), true),
            None => (name, false),
        };

        // 单独的 `!` 按字面值处理
        let (value, not_equal) = match value.filter(|v| !v.is_empty()) {
            Some(v) if v.len() > 1 && v.starts_with(NOT_OPERATOR) => (Some(v[1..].trim()), true),
            other => (other, false),
        };

        Ok(TagFilter {
            name: Pattern::parse(source, name)?,
            value: value.map(|v| Pattern::parse(source, v)).transpose()?,
            not_tag,
            not_equal,
        })
    }

    fn matches_pair(&self, name: &str, value: &str) -> bool {
        self.name.matches(name) != self.not_tag
            && self
                .value
                .as_ref()
                .map_or(true, |v| v.matches(value) != self.not_equal)
    }
}

/// 编译后的标签过滤器集合，构造时校验正则表达式
#[derive(Debug, Clone)]
pub struct TagFilterSet {
    source: String,
    filters: Vec<TagFilter>,
}

impl TagFilterSet {
    pub fn parse(source: &str) -> Result<Self> {
        let regex_value = format!("{NAME_VALUE_SEPARATOR}{REGEX_PREFIX}");
        let items: Vec<&str> = if source.starts_with(REGEX_PREFIX) || source.contains(&regex_value) {
            vec![source.trim()]
        } else {
            source.split(FILTER_SEPARATOR).map(str::trim).collect()
        };

        let filters = items
            .into_iter()
            .map(|item| TagFilter::parse(source, item))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            source: source.to_string(),
            filters,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// 字符串是否匹配任意一项过滤器（只比较名称部分）
    pub fn string_matches_any(&self, s: &str) -> bool {
        self.filters.iter().any(|f| f.name.matches(s))
    }

    /// 字符串是否匹配全部过滤器（只比较名称部分）
    pub fn string_matches_all(&self, s: &str) -> bool {
        self.filters.iter().all(|f| f.name.matches(s))
    }

    /// 返回匹配任意一项过滤器的标签
    pub fn pairs_matching_any(&self, tags: &BTreeMap<String, String>) -> BTreeMap<String, String> {
        tags.iter()
            .filter(|(name, value)| self.filters.iter().any(|f| f.matches_pair(name, value)))
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect()
    }

    /// 返回匹配全部过滤器的标签
    pub fn pairs_matching_all(&self, tags: &BTreeMap<String, String>) -> BTreeMap<String, String> {
        tags.iter()
            .filter(|(name, value)| self.filters.iter().all(|f| f.matches_pair(name, value)))
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect()
    }

    /// 资源是否被选中：任意标签匹配任意过滤器
    pub fn matches_tags(&self, tags: &BTreeMap<String, String>) -> bool {
        tags.iter()
            .any(|(name, value)| self.filters.iter().any(|f| f.matches_pair(name, value)))
    }
}
