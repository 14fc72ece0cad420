/// 自动激活扩展的选取
///
/// 一个扩展可以携带激活元数据（分组、触发参数键、顺序），
/// `ExtensionScope::activated` 按 URL 上的显式列表参数与激活条件
/// 计算出最终生效的有序扩展列表。

use std::sync::Arc;

use crate::{error::RpcError, url::Url};

use super::ExtensionScope;

/// 列表参数中排除项的前缀，`-name` 排除指定扩展，`-default` 排除整个默认组
const REMOVE_PREFIX: char = '-';
/// 列表参数中默认组的占位符，决定显式命名项与默认组的相对位置
const DEFAULT_PLACEHOLDER: &str = "default";

/// 激活元数据
#[derive(Debug, Clone, Default)]
pub struct ActivateMeta {
    groups: Vec<String>,
    value_keys: Vec<String>,
    order: i32,
}

impl ActivateMeta {
    pub fn new() -> Self {
        Self::default()
    }

    /// 限定激活分组（为空表示任意分组都激活）
    pub fn group(mut self, group: impl Into<String>) -> Self {
        self.groups.push(group.into());
        self
    }

    /// 限定触发参数键：URL 上存在任一非空的键（含方法级形式）才激活
    pub fn value_key(mut self, key: impl Into<String>) -> Self {
        self.value_keys.push(key.into());
        self
    }

    /// 激活顺序，越小越靠前
    pub fn order(mut self, order: i32) -> Self {
        self.order = order;
        self
    }

    fn matches_group(&self, group: &str) -> bool {
        self.groups.is_empty() || self.groups.iter().any(|g| g == group)
    }

    fn matches_value(&self, url: &Url) -> bool {
        if self.value_keys.is_empty() {
            return true;
        }
        url.parameters().iter().any(|(k, v)| {
            !v.is_empty()
                && self
                    .value_keys
                    .iter()
                    .any(|key| k == key || k.ends_with(&format!(".{}", key)))
        })
    }
}

impl ExtensionScope {
    /// 计算激活扩展列表
    ///
    /// * `list_key` — URL 上承载显式包含/排除列表的参数名（逗号分隔）。
    /// * `group` — 当前调用方所处的分组。
    ///
    /// 结果顺序：`default` 占位符之前的显式项、按 order 排序的默认组、
    /// 其余显式项。显式项未注册时返回 `ExtensionNotFound`。
    pub fn activated<T>(
        &self,
        url: &Url,
        list_key: &str,
        group: &str,
    ) -> Result<Vec<(String, Arc<T>)>, RpcError>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        let table = self.table::<T>()?;
        let names: Vec<&str> = url
            .parameter(list_key)
            .map(|v| v.split(',').map(str::trim).filter(|s| !s.is_empty()).collect())
            .unwrap_or_default();

        let excluded = |name: &str| {
            names
                .iter()
                .any(|n| n.strip_prefix(REMOVE_PREFIX) == Some(name))
        };

        // 默认组：携带激活元数据且满足分组/触发条件的扩展
        let mut result: Vec<(String, Arc<T>)> = Vec::new();
        if !excluded(DEFAULT_PLACEHOLDER) {
            let mut matched: Vec<(i32, usize, &str)> = Vec::new();
            for (index, entry) in table.entries.iter().enumerate() {
                let Some(meta) = &entry.activate else { continue };
                if names.contains(&entry.name.as_str()) || excluded(&entry.name) {
                    continue;
                }
                if meta.matches_group(group) && meta.matches_value(url) {
                    matched.push((meta.order, index, &entry.name));
                }
            }
            // 稳定排序：order 相同时保持声明顺序
            matched.sort_by_key(|(order, index, _)| (*order, *index));
            for (_, _, name) in matched {
                result.push((name.to_string(), table.get(name, self)?));
            }
        }

        // 显式命名项，`default` 占位符决定它们相对默认组的位置
        let mut explicit: Vec<(String, Arc<T>)> = Vec::new();
        for name in &names {
            if name.starts_with(REMOVE_PREFIX) || excluded(name) {
                continue;
            }
            if *name == DEFAULT_PLACEHOLDER {
                if !explicit.is_empty() {
                    let tail = std::mem::take(&mut explicit);
                    result.splice(0..0, tail);
                }
            } else {
                explicit.push((name.to_string(), table.get(name, self)?));
            }
        }
        result.extend(explicit);

        Ok(result)
    }
}
