/// 统一配置载体 URL
///
/// 整个框架的配置都通过 URL 传递：`protocol://host:port/path?key1=value1&key2=value2`。
/// URL 不可变，任何修改都会产生一个新的副本，因此可以安全地在线程间共享。

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::error::RpcError;

/// 不可变的配置载体
///
/// 参数使用 BTreeMap 保存，保证序列化结果确定，
/// `parse -> to_string -> parse` 严格幂等。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Url {
    protocol: String,
    host: String,
    port: u16,
    path: String,
    parameters: BTreeMap<String, String>,
}

impl Url {
    /// 创建新的 URL
    pub fn new(
        protocol: impl Into<String>,
        host: impl Into<String>,
        port: u16,
        path: impl Into<String>,
    ) -> Self {
        Self {
            protocol: protocol.into(),
            host: host.into(),
            port,
            path: path.into(),
            parameters: BTreeMap::new(),
        }
    }

    /// 解析 URL 字符串
    ///
    /// 这是注册中心之间交换的文本格式，解析失败返回 `InvalidUrl`。
    pub fn parse(input: &str) -> Result<Self, RpcError> {
        let invalid = |reason: &str| RpcError::invalid_url(input, reason);

        let (protocol, rest) = input
            .split_once("://")
            .ok_or_else(|| invalid("missing '://' separator"))?;
        if protocol.is_empty() {
            return Err(invalid("empty protocol"));
        }

        // 切出查询串
        let (location, query) = match rest.split_once('?') {
            Some((l, q)) => (l, Some(q)),
            None => (rest, None),
        };

        // 切出路径
        let (authority, path) = match location.split_once('/') {
            Some((a, p)) => (a, p.to_string()),
            None => (location, String::new()),
        };
        if authority.is_empty() {
            return Err(invalid("empty host"));
        }

        let (host, port) = match authority.rsplit_once(':') {
            Some((h, p)) => {
                let port: u16 = p
                    .parse()
                    .map_err(|_| invalid("port is not a number"))?;
                (h.to_string(), port)
            }
            None => (authority.to_string(), 0),
        };
        if host.is_empty() {
            return Err(invalid("empty host"));
        }

        let mut parameters = BTreeMap::new();
        if let Some(query) = query {
            for pair in query.split('&').filter(|p| !p.is_empty()) {
                match pair.split_once('=') {
                    Some((k, v)) if !k.is_empty() => {
                        parameters.insert(k.to_string(), v.to_string());
                    }
                    _ => return Err(invalid("malformed query pair")),
                }
            }
        }

        Ok(Self {
            protocol: protocol.to_string(),
            host,
            port,
            path,
            parameters,
        })
    }

    /// 协议名
    pub fn protocol(&self) -> &str {
        &self.protocol
    }

    /// 主机
    pub fn host(&self) -> &str {
        &self.host
    }

    /// 端口
    pub fn port(&self) -> u16 {
        self.port
    }

    /// 路径（逻辑服务名）
    pub fn path(&self) -> &str {
        &self.path
    }

    /// `host:port` 形式的端点地址
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// 逻辑服务标识
    pub fn service_key(&self) -> &str {
        &self.path
    }

    /// 获取参数
    pub fn parameter(&self, key: &str) -> Option<&str> {
        self.parameters.get(key).map(|s| s.as_str())
    }

    /// 获取参数，缺省时返回默认值
    pub fn parameter_or<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.parameter(key).unwrap_or(default)
    }

    /// 获取方法级参数
    ///
    /// 先查找 `method.key`，不存在时回落到全局 `key`。
    pub fn method_parameter(&self, method: &str, key: &str) -> Option<&str> {
        self.parameters
            .get(&format!("{}.{}", method, key))
            .or_else(|| self.parameters.get(key))
            .map(|s| s.as_str())
    }

    /// 获取布尔参数
    pub fn parameter_bool(&self, key: &str, default: bool) -> bool {
        self.parameter(key)
            .and_then(|v| v.parse().ok())
            .unwrap_or(default)
    }

    /// 获取整数参数
    pub fn parameter_i64(&self, key: &str, default: i64) -> i64 {
        self.parameter(key)
            .and_then(|v| v.parse().ok())
            .unwrap_or(default)
    }

    /// 获取方法级整数参数
    pub fn method_parameter_i64(&self, method: &str, key: &str, default: i64) -> i64 {
        self.method_parameter(method, key)
            .and_then(|v| v.parse().ok())
            .unwrap_or(default)
    }

    /// 获取方法级毫秒时长参数
    pub fn method_parameter_duration(&self, method: &str, key: &str, default: Duration) -> Duration {
        self.method_parameter(method, key)
            .and_then(|v| v.parse::<u64>().ok())
            .map(Duration::from_millis)
            .unwrap_or(default)
    }

    /// 全部参数
    pub fn parameters(&self) -> &BTreeMap<String, String> {
        &self.parameters
    }

    /// 派生副本：添加/覆盖一个参数
    pub fn with_parameter(&self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let mut url = self.clone();
        url.parameters.insert(key.into(), value.into());
        url
    }

    /// 派生副本：批量添加参数
    pub fn with_parameters<K, V>(&self, pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        let mut url = self.clone();
        for (k, v) in pairs {
            url.parameters.insert(k.into(), v.into());
        }
        url
    }

    /// 派生副本：删除一个参数
    pub fn without_parameter(&self, key: &str) -> Self {
        let mut url = self.clone();
        url.parameters.remove(key);
        url
    }
}

impl fmt::Display for Url {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}:{}", self.protocol, self.host, self.port)?;
        if !self.path.is_empty() {
            write!(f, "/{}", self.path)?;
        }
        let mut first = true;
        for (k, v) in &self.parameters {
            write!(f, "{}{}={}", if first { "?" } else { "&" }, k, v)?;
            first = false;
        }
        Ok(())
    }
}

impl FromStr for Url {
    type Err = RpcError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_url() {
        let url = Url::parse("dubbo://10.20.130.230:20880/com.foo.BarService?timeout=1000&loadbalance=random").unwrap();
        assert_eq!(url.protocol(), "dubbo");
        assert_eq!(url.host(), "10.20.130.230");
        assert_eq!(url.port(), 20880);
        assert_eq!(url.path(), "com.foo.BarService");
        assert_eq!(url.parameter("timeout"), Some("1000"));
        assert_eq!(url.parameter("loadbalance"), Some("random"));
    }

    #[test]
    fn test_parse_without_port_and_path() {
        let url = Url::parse("thread://x").unwrap();
        assert_eq!(url.protocol(), "thread");
        assert_eq!(url.host(), "x");
        assert_eq!(url.port(), 0);
        assert_eq!(url.path(), "");
    }

    #[test]
    fn test_parse_errors() {
        assert!(Url::parse("no-separator").is_err());
        assert!(Url::parse("://host:1/p").is_err());
        assert!(Url::parse("p://").is_err());
        assert!(Url::parse("p://h:abc/x").is_err());
        assert!(Url::parse("p://h:1/x?=v").is_err());
    }

    #[test]
    fn test_round_trip_is_idempotent() {
        let inputs = [
            "dubbo://127.0.0.1:20880/demo.Service?a=1&b=2&group=cn",
            "registry://r:2181/reg?backup=r2:2181",
            "thread://x:0?threadpool=fixed",
        ];
        for s in inputs {
            let url = Url::parse(s).unwrap();
            let reparsed = Url::parse(&url.to_string()).unwrap();
            assert_eq!(url, reparsed);
            // 再序列化一次仍然相同
            assert_eq!(url.to_string(), reparsed.to_string());
        }
    }

    #[test]
    fn test_method_parameter_fallback() {
        let url = Url::parse("dubbo://h:1/s?timeout=1000&sayHello.timeout=250").unwrap();
        assert_eq!(url.method_parameter("sayHello", "timeout"), Some("250"));
        assert_eq!(url.method_parameter("sayHi", "timeout"), Some("1000"));
        assert_eq!(url.method_parameter("sayHi", "retries"), None);
        assert_eq!(
            url.method_parameter_duration("sayHello", "timeout", Duration::from_secs(1)),
            Duration::from_millis(250)
        );
    }

    #[test]
    fn test_with_parameter_is_copy_on_write() {
        let url = Url::parse("dubbo://h:1/s?a=1").unwrap();
        let derived = url.with_parameter("b", "2");
        assert_eq!(url.parameter("b"), None);
        assert_eq!(derived.parameter("b"), Some("2"));
        assert_eq!(derived.parameter("a"), Some("1"));

        let removed = derived.without_parameter("a");
        assert_eq!(removed.parameter("a"), None);
        assert_eq!(derived.parameter("a"), Some("1"));
    }

    #[test]
    fn test_typed_getters() {
        let url = Url::parse("dubbo://h:1/s?retries=3&check=false").unwrap();
        assert_eq!(url.parameter_i64("retries", 2), 3);
        assert_eq!(url.parameter_i64("missing", 2), 2);
        assert!(!url.parameter_bool("check", true));
        assert!(url.parameter_bool("missing", true));
    }
}
