/// 标签路由
///
/// 请求附件 `tag` 指定要访问的流量分组。提供方的分组来自两处：
/// URL 参数 `tag`（静态打标）或 JSON 规则中按地址列表的动态打标。
/// 带标签的请求在对应分组为空且 `force=false` 时回落到无标签的提供方；
/// 无标签的请求只会看到无标签的提供方。

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

/// 请求附件 / 提供方 URL 上的标签键
pub const TAG_KEY: &str = "tag";
/// JSON 规则参数
pub const TAG_RULE_KEY: &str = "tag.rule";
/// 分组为空时是否强制返回空
pub const TAG_FORCE_KEY: &str = "tag.force";

fn default_enabled() -> bool {
    true
}

/// 动态标签规则文档
#[derive(Debug, Clone, Deserialize, Default)]
pub struct TagRule {
    #[serde(default)]
    pub force: bool,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub tags: Vec<TagDefinition>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TagDefinition {
    pub name: String,
    #[serde(default)]
    pub addresses: Vec<String>,
}

impl TagRule {
    fn tag_of_address(&self, address: &str) -> Option<&str> {
        self.tags
            .iter()
            .find(|t| t.addresses.iter().any(|a| a == address))
            .map(|t| t.name.as_str())
    }
}

/// 标签路由器
pub struct TagRouter {
    rule: Option<TagRule>,
    force: bool,
}

impl TagRouter {
    pub fn new(rule: Option<TagRule>, force: bool) -> Self {
        let force = rule.as_ref().map(|r| r.force).unwrap_or(force);
        Self { rule, force }
    }

    /// 从 JSON 文本解析规则；解析失败时仅保留静态打标行为
    pub fn from_json(rule: Option<&str>, force: bool) -> Self {
        let parsed = rule.and_then(|text| match serde_json::from_str::<TagRule>(text) {
            Ok(rule) if rule.enabled => Some(rule),
            Ok(_) => None,
            Err(e) => {
                warn!(error = %e, "invalid tag rule document, dynamic tagging disabled");
                None
            }
        });
        Self::new(parsed, force)
    }

    /// 提供方的生效标签：动态规则优先于静态 URL 参数
    fn tag_of(&self, invoker: &InvokerRef) -> Option<String> {
        if let Some(rule) = &self.rule {
            if let Some(tag) = rule.tag_of_address(&invoker.url().address()) {
                return Some(tag.to_string());
            }
        }
        invoker.url().parameter(TAG_KEY).map(str::to_string)
    }
}

impl Router for TagRouter {
    fn name(&self) -> &'static str {
        "tag"
    }

    fn priority(&self) -> i32 {
        100
    }

    fn route(
        &self,
        invokers: Vec<InvokerRef>,
        _url: &Url,
        invocation: &Invocation,
    ) -> Vec<InvokerRef> {
        if invokers.is_empty() {
            return invokers;
        }

        let untagged = |list: &[InvokerRef]| -> Vec<InvokerRef> {
            list.iter()
                .filter(|i| self.tag_of(i).is_none())
                .cloned()
                .collect()
        };

        match invocation.get_attachment(TAG_KEY) {
            Some(tag) if !tag.is_empty() => {
                let tagged: Vec<InvokerRef> = invokers
                    .iter()
                    .filter(|i| self.tag_of(i).as_deref() == Some(tag))
                    .cloned()
                    .collect();
                if !tagged.is_empty() {
                    return tagged;
                }
                if self.force {
                    warn!(tag, service = %invocation.service(),
                        "no provider for requested tag, forced empty result");
                    return Vec::new();
                }
                // 回落到无标签分组，仍为空则放行原始列表
                let fallback = untagged(&invokers);
                if fallback.is_empty() {
                    invokers
                } else {
                    fallback
                }
            }
            _ => {
                // 无标签请求只访问无标签提供方
                let fallback = untagged(&invokers);
                if fallback.is_empty() && !self.force {
                    invokers
                } else {
                    fallback
                }
            }
        }
    }
}

/// 标签路由工厂：始终参与静态打标，JSON 规则可选
pub struct TagRouterFactory;

impl RouterFactory for TagRouterFactory {
    fn create(&self, url: &Url) -> Result<Arc<dyn Router>, RpcError> {
        let force = url.parameter_bool(TAG_FORCE_KEY, false);
        Ok(Arc::new(TagRouter::from_json(url.parameter(TAG_RULE_KEY), force)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::invoker::tests_support::new_test_invoker;

    fn invokers() -> Vec<InvokerRef> {
        vec![
            new_test_invoker("dubbo://10.0.0.1:20880/demo.Service?tag=gray"),
            new_test_invoker("dubbo://10.0.0.2:20880/demo.Service"),
            new_test_invoker("dubbo://10.0.0.3:20880/demo.Service"),
        ]
    }

    fn consumer() -> Url {
        Url::parse("consumer://0.0.0.0/demo.Service").unwrap()
    }

    fn hosts(list: &[InvokerRef]) -> Vec<&str> {
        list.iter().map(|i| i.url().host()).collect()
    }

    #[test]
    fn test_tagged_request_sees_tagged_subset() {
        let router = TagRouter::new(None, false);
        let inv = Invocation::new("demo.Service", "say").attachment("tag", "gray");
        let routed = router.route(invokers(), &consumer(), &inv);
        assert_eq!(hosts(&routed), vec!["10.0.0.1"]);
    }

    #[test]
    fn test_untagged_request_sees_untagged_subset() {
        let router = TagRouter::new(None, false);
        let inv = Invocation::new("demo.Service", "say");
        let routed = router.route(invokers(), &consumer(), &inv);
        assert_eq!(hosts(&routed), vec!["10.0.0.2", "10.0.0.3"]);
    }

    #[test]
    fn test_missing_tag_falls_back_unless_forced() {
        let inv = Invocation::new("demo.Service", "say").attachment("tag", "blue");

        let router = TagRouter::new(None, false);
        let routed = router.route(invokers(), &consumer(), &inv);
        assert_eq!(hosts(&routed), vec!["10.0.0.2", "10.0.0.3"]);

        let router = TagRouter::new(None, true);
        assert!(router.route(invokers(), &consumer(), &inv).is_empty());
    }

    #[test]
    fn test_dynamic_rule_tags_by_address() {
        let rule = r#"{"force":false,"tags":[{"name":"canary","addresses":["10.0.0.2:20880"]}]}"#;
        let router = TagRouter::from_json(Some(rule), false);
        let inv = Invocation::new("demo.Service", "say").attachment("tag", "canary");
        let routed = router.route(invokers(), &consumer(), &inv);
        assert_eq!(hosts(&routed), vec!["10.0.0.2"]);
    }

    #[test]
    fn test_malformed_rule_keeps_static_behavior() {
        let router = TagRouter::from_json(Some("{not json"), false);
        let inv = Invocation::new("demo.Service", "say").attachment("tag", "gray");
        let routed = router.route(invokers(), &consumer(), &inv);
        assert_eq!(hosts(&routed), vec!["10.0.0.1"]);
    }
}
