/// 条件路由
///
/// 规则形如 `host = 10.20.153.10 => host = 10.20.153.11`：
/// `=>` 左侧是 when 条件（匹配哪些调用），右侧是 then 条件
/// （放行哪些提供方）。键支持 `method`、`host`、`address` 与任意
/// URL 参数/附件；值支持精确、`prefix*`、`*suffix`、逗号多值与
/// 孤立 `*` 通配（通配永远最后判定）。
///
/// 规则解析失败只会禁用本路由器（放行全部），不会影响调用。

use std::collections::HashMap;
use std::sync::Arc;

use tracing::warn;

use crate::{
    error::RpcError,
    invocation::Invocation,
    invoker::InvokerRef,
    url::Url,
};

use super::{Router, RouterFactory};

/// 条件规则的 URL 参数
pub const RULE_KEY: &str = "rule";
/// 过滤结果为空时是否强制生效
pub const FORCE_KEY: &str = "force";

const SEPARATORS: [char; 4] = ['&', '!', '=', ','];

#[derive(Debug, Default, Clone)]
struct MatchPair {
    matches: Vec<String>,
    mismatches: Vec<String>,
}

impl MatchPair {
    fn is_match(&self, value: &str) -> bool {
        match (self.matches.is_empty(), self.mismatches.is_empty()) {
            (false, true) => any_pattern_matches(&self.matches, value),
            (true, false) => !any_pattern_matches(&self.mismatches, value),
            (false, false) => {
                !any_pattern_matches(&self.mismatches, value)
                    && any_pattern_matches(&self.matches, value)
            }
            (true, true) => false,
        }
    }
}

/// 模式集合匹配：非通配模式先判定，孤立 `*` 永远最后
fn any_pattern_matches(patterns: &[String], value: &str) -> bool {
    let plain = patterns.iter().filter(|p| !p.contains('*'));
    let globs = patterns.iter().filter(|p| p.contains('*') && p.as_str() != "*");
    let catch_all = patterns.iter().any(|p| p == "*");

    for p in plain {
        if p == value {
            return true;
        }
    }
    for p in globs {
        if glob_matches(p, value) {
            return true;
        }
    }
    catch_all
}

fn glob_matches(pattern: &str, value: &str) -> bool {
    if pattern == "*" {
        return true;
    }
    match pattern.find('*') {
        None => pattern == value,
        Some(pos) => {
            let (prefix, rest) = pattern.split_at(pos);
            let suffix = &rest[1..];
            value.len() >= prefix.len() + suffix.len()
                && value.starts_with(prefix)
                && value.ends_with(suffix)
        }
    }
}

type Condition = HashMap<String, MatchPair>;

/// 规则字符串词法：`(分隔符, 内容)` 序列
fn tokens(rule: &str) -> Vec<(String, String)> {
    let mut out = Vec::new();
    let mut chars = rule.chars().peekable();
    loop {
        while matches!(chars.peek(), Some(c) if c.is_whitespace()) {
            chars.next();
        }
        let mut separator = String::new();
        while matches!(chars.peek(), Some(c) if SEPARATORS.contains(c)) {
            separator.push(chars.next().unwrap());
        }
        while matches!(chars.peek(), Some(c) if c.is_whitespace()) {
            chars.next();
        }
        let mut content = String::new();
        while matches!(chars.peek(), Some(c) if !SEPARATORS.contains(c) && !c.is_whitespace()) {
            content.push(chars.next().unwrap());
        }
        if content.is_empty() {
            break;
        }
        out.push((separator, content));
    }
    out
}

fn parse_condition(rule: &str) -> Result<Condition, RpcError> {
    let illegal = |detail: String| {
        RpcError::illegal_argument(format!("illegal route rule '{}': {}", rule, detail))
    };

    let mut condition: Condition = HashMap::new();
    let mut current_key: Option<String> = None;
    // 记录逗号续接的目标集合：true 表示 matches
    let mut appending_matches = false;

    for (separator, content) in tokens(rule) {
        match separator.as_str() {
            "" | "&" => {
                condition.entry(content.clone()).or_default();
                current_key = Some(content);
            }
            "=" | "!=" => {
                let key = current_key
                    .clone()
                    .ok_or_else(|| illegal(format!("missing key before '{}{}'", separator, content)))?;
                let pair = condition.entry(key).or_default();
                if separator == "=" {
                    pair.matches.push(content);
                    appending_matches = true;
                } else {
                    pair.mismatches.push(content);
                    appending_matches = false;
                }
            }
            "," => {
                let key = current_key
                    .clone()
                    .ok_or_else(|| illegal(format!("missing value before ',{}'", content)))?;
                let pair = condition.entry(key).or_default();
                let target = if appending_matches {
                    &mut pair.matches
                } else {
                    &mut pair.mismatches
                };
                if target.is_empty() {
                    return Err(illegal(format!("',' before any value near '{}'", content)));
                }
                target.push(content);
            }
            other => return Err(illegal(format!("unexpected separator '{}'", other))),
        }
    }
    Ok(condition)
}

fn match_condition<'a>(
    condition: &Condition,
    lookup: impl Fn(&str) -> Option<&'a str>,
) -> bool {
    for (key, pair) in condition {
        match lookup(key) {
            Some(value) => {
                if !pair.is_match(value) {
                    return false;
                }
            }
            // 取不到值：有正向匹配要求则视为不匹配，只有反向要求时放过
            None => {
                if !pair.matches.is_empty() {
                    return false;
                }
            }
        }
    }
    true
}

/// 条件路由器
pub struct ConditionRouter {
    when: Condition,
    then: Option<Condition>,
    force: bool,
    enabled: bool,
}

impl ConditionRouter {
    /// 解析规则构造路由器，解析失败时降级为放行并告警
    pub fn new(rule: &str, force: bool) -> Self {
        match Self::parse_rule(rule) {
            Ok((when, then)) => Self {
                when,
                then,
                force,
                enabled: true,
            },
            Err(e) => {
                warn!(rule, error = %e, "invalid condition rule, router disabled (pass-through)");
                Self {
                    when: Condition::new(),
                    then: None,
                    force: false,
                    enabled: false,
                }
            }
        }
    }

    fn parse_rule(rule: &str) -> Result<(Condition, Option<Condition>), RpcError> {
        let rule = rule.replace("consumer.", "").replace("provider.", "");
        if rule.trim().is_empty() {
            return Err(RpcError::illegal_argument("empty route rule"));
        }
        let (when_rule, then_rule) = match rule.split_once("=>") {
            Some((w, t)) => (w.trim().to_string(), t.trim().to_string()),
            None => (String::new(), rule.trim().to_string()),
        };
        let when = if when_rule.is_empty() || when_rule == "true" {
            Condition::new()
        } else {
            parse_condition(&when_rule)?
        };
        let then = if then_rule.is_empty() || then_rule == "false" {
            None
        } else {
            Some(parse_condition(&then_rule)?)
        };
        Ok((when, then))
    }

    fn matches_when(&self, url: &Url, invocation: &Invocation) -> bool {
        if self.when.is_empty() {
            return true;
        }
        match_condition(&self.when, |key| match key {
            "method" => Some(invocation.method()),
            "host" => Some(url.host()),
            _ => url.parameter(key).or_else(|| invocation.get_attachment(key)),
        })
    }

    fn matches_then(&self, condition: &Condition, provider: &Url) -> bool {
        match_condition(condition, |key| match key {
            "host" => Some(provider.host()),
            _ => provider.parameter(key),
        })
    }
}

impl Router for ConditionRouter {
    fn name(&self) -> &'static str {
        "condition"
    }

    fn priority(&self) -> i32 {
        200
    }

    fn route(
        &self,
        invokers: Vec<InvokerRef>,
        url: &Url,
        invocation: &Invocation,
    ) -> Vec<InvokerRef> {
        if !self.enabled || invokers.is_empty() {
            return invokers;
        }
        if !self.matches_when(url, invocation) {
            return invokers;
        }

        let Some(then) = &self.then else {
            // then 为空表示黑名单规则
            if self.force {
                warn!(service = %invocation.service(), "condition rule blacklists all providers (force)");
                return Vec::new();
            }
            warn!(service = %invocation.service(),
                "condition rule has empty then-clause, ignored because force=false");
            return invokers;
        };

        let result: Vec<InvokerRef> = invokers
            .iter()
            .filter(|invoker| self.matches_then(then, invoker.url()))
            .cloned()
            .collect();

        if !result.is_empty() {
            result
        } else if self.force {
            warn!(service = %invocation.service(),
                "condition rule filtered all providers, forced empty result");
            Vec::new()
        } else {
            // force=false：绝不悄悄返回空列表
            invokers
        }
    }
}

/// 条件路由工厂：消费方 URL 带 `rule` 参数时激活
pub struct ConditionRouterFactory;

impl RouterFactory for ConditionRouterFactory {
    fn create(&self, url: &Url) -> Result<Arc<dyn Router>, RpcError> {
        let rule = url.parameter(RULE_KEY).unwrap_or_default();
        let force = url.parameter_bool(FORCE_KEY, false);
        Ok(Arc::new(ConditionRouter::new(rule, force)))
    }
}
