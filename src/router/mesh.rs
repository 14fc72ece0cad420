/// Mesh 目的地路由
///
/// 规则把提供方按标签划分为若干子集（subset），再按请求特征
/// （方法名、附件）把流量导向某个子集，目的地不可用时沿 fallback
/// 链逐级降级。规则解析失败时路由器整体放行。

use std::collections::HashMap;
use std::sync::Arc;

use serde::Deserialize;
use tracing::warn;

use crate::{
    error::RpcError,
    invocation::Invocation,
    invoker::InvokerRef,
    url::Url,
};

use super::{Router, RouterFactory};

/// JSON 规则参数
pub const MESH_RULE_KEY: &str = "mesh.rule";

fn default_enabled() -> bool {
    true
}

/// Mesh 路由规则文档
#[derive(Debug, Clone, Deserialize, Default)]
pub struct MeshRule {
    #[serde(default)]
    pub force: bool,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub subsets: Vec<Subset>,
    #[serde(default)]
    pub routes: Vec<RouteEntry>,
}

/// 提供方子集：labels 全部匹配提供方 URL 参数才算命中
#[derive(Debug, Clone, Deserialize)]
pub struct Subset {
    pub name: String,
    #[serde(default)]
    pub labels: HashMap<String, String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RouteEntry {
    #[serde(default)]
    pub r#match: Option<RouteMatch>,
    pub destination: Destination,
}

/// 请求匹配条件：method 支持 `prefix*` 通配，attachments 需全部相等
#[derive(Debug, Clone, Deserialize, Default)]
pub struct RouteMatch {
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub attachments: HashMap<String, String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Destination {
    pub subset: String,
    #[serde(default)]
    pub fallback: Vec<String>,
}

impl RouteMatch {
    fn matches(&self, invocation: &Invocation) -> bool {
        if let Some(pattern) = &self.method {
            let hit = match pattern.strip_suffix('*') {
                Some(prefix) => invocation.method().starts_with(prefix),
                None => invocation.method() == pattern,
            };
            if !hit {
                return false;
            }
        }
        self.attachments
            .iter()
            .all(|(k, v)| invocation.get_attachment(k) == Some(v.as_str()))
    }
}

/// Mesh 路由器
pub struct MeshRouter {
    rule: Option<MeshRule>,
}

impl MeshRouter {
    pub fn new(rule: Option<MeshRule>) -> Self {
        Self { rule }
    }

    /// 从 JSON 文本解析规则，失败时禁用本路由器
    pub fn from_json(rule: Option<&str>) -> Self {
        let parsed = rule.and_then(|text| match serde_json::from_str::<MeshRule>(text) {
            Ok(rule) if rule.enabled => Some(rule),
            Ok(_) => None,
            Err(e) => {
                warn!(error = %e, "invalid mesh rule document, router disabled (pass-through)");
                None
            }
        });
        Self::new(parsed)
    }

    fn subset_members(
        rule: &MeshRule,
        name: &str,
        invokers: &[InvokerRef],
    ) -> Vec<InvokerRef> {
        let Some(subset) = rule.subsets.iter().find(|s| s.name == name) else {
            warn!(subset = name, "mesh rule references unknown subset");
            return Vec::new();
        };
        invokers
            .iter()
            .filter(|i| {
                subset
                    .labels
                    .iter()
                    .all(|(k, v)| i.url().parameter(k) == Some(v.as_str()))
            })
            .cloned()
            .collect()
    }
}

impl Router for MeshRouter {
    fn name(&self) -> &'static str {
        "mesh"
    }

    fn priority(&self) -> i32 {
        300
    }

    fn route(
        &self,
        invokers: Vec<InvokerRef>,
        _url: &Url,
        invocation: &Invocation,
    ) -> Vec<InvokerRef> {
        let Some(rule) = &self.rule else {
            return invokers;
        };
        if invokers.is_empty() {
            return invokers;
        }

        // 第一条命中的路由决定目的地
        let entry = rule.routes.iter().find(|entry| {
            entry
                .r#match
                .as_ref()
                .map(|m| m.matches(invocation))
                .unwrap_or(true)
        });
        let Some(entry) = entry else {
            return invokers;
        };

        // 目的地子集为空时沿 fallback 链降级
        let mut candidates = vec![entry.destination.subset.as_str()];
        candidates.extend(entry.destination.fallback.iter().map(String::as_str));
        for name in candidates {
            let members = Self::subset_members(rule, name, &invokers);
            if !members.is_empty() {
                return members;
            }
        }

        if rule.force {
            warn!(service = %invocation.service(),
                "mesh destination and fallbacks are all empty, forced empty result");
            Vec::new()
        } else {
            invokers
        }
    }
}

/// Mesh 路由工厂：消费方 URL 带 `mesh.rule` 参数时激活
pub struct MeshRouterFactory;

impl RouterFactory for MeshRouterFactory {
    fn create(&self, url: &Url) -> Result<Arc<dyn Router>, RpcError> {
        Ok(Arc::new(MeshRouter::from_json(url.parameter(MESH_RULE_KEY))))
    }
}
