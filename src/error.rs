use std::time::Duration;

/// 统一的 RPC 错误类型
///
/// 错误分为四类：配置类（扩展缺失、参数非法）、构造类（扩展初始化失败）、
/// 路由类（目录已销毁、无可用 Invoker）、调用类（远程调用失败 / 超时）。
/// 只有调用类错误可能被集群层重试。
#[derive(Debug, thiserror::Error, Clone)]
pub enum RpcError {
    /// 指定名称的扩展未注册
    #[error("Extension '{name}' not found for interface '{interface}'")]
    ExtensionNotFound {
        interface: &'static str,
        name: String,
    },

    /// 扩展构造失败
    #[error("Failed to create extension '{name}' of interface '{interface}': {reason}")]
    ExtensionInit {
        interface: &'static str,
        name: String,
        reason: String,
    },

    /// 参数非法
    #[error("Illegal argument: {reason}")]
    IllegalArgument { reason: String },

    /// 状态非法
    #[error("Illegal state: {reason}")]
    IllegalState { reason: String },

    /// URL 解析失败
    #[error("Invalid URL '{input}': {reason}")]
    InvalidUrl { input: String, reason: String },

    /// 目录已销毁
    #[error("Directory for service '{service}' is already destroyed")]
    DirectoryDestroyed { service: String },

    /// 路由后没有可用的 Invoker
    #[error("No available invoker for {service}.{method} after routing (routers: [{}])", routers.join(", "))]
    NoAvailableInvoker {
        service: String,
        method: String,
        routers: Vec<String>,
    },

    /// 单次调用失败
    ///
    /// `retryable` 区分传输层失败（可重试）与业务失败（不可重试）。
    #[error("Invocation of {service}.{method} on {endpoint} failed: {reason} (retryable: {retryable})")]
    Invocation {
        service: String,
        method: String,
        endpoint: String,
        reason: String,
        retryable: bool,
    },

    /// 调用超时
    #[error("Invocation of {service}.{method} timed out after {elapsed:?}")]
    Timeout {
        service: String,
        method: String,
        elapsed: Duration,
    },

    /// 集群策略重试耗尽
    ///
    /// 聚合所有尝试过的端点，便于运维排查。
    #[error("All {attempts} attempts of {service}.{method} failed, tried endpoints: [{}]; last error: {last}", endpoints.join(", "))]
    ClusterFailed {
        service: String,
        method: String,
        attempts: usize,
        endpoints: Vec<String>,
        last: String,
    },
}

impl RpcError {
    /// 判断错误是否可被集群策略重试
    pub fn is_retryable(&self) -> bool {
        match self {
            RpcError::Invocation { retryable, .. } => *retryable,
            RpcError::Timeout { .. } => true,
            _ => false,
        }
    }
}

/// 便利构造函数
impl RpcError {
    pub fn extension_not_found(interface: &'static str, name: impl Into<String>) -> Self {
        Self::ExtensionNotFound {
            interface,
            name: name.into(),
        }
    }

    pub fn extension_init(
        interface: &'static str,
        name: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::ExtensionInit {
            interface,
            name: name.into(),
            reason: reason.into(),
        }
    }

    pub fn illegal_argument(reason: impl Into<String>) -> Self {
        Self::IllegalArgument {
            reason: reason.into(),
        }
    }

    pub fn illegal_state(reason: impl Into<String>) -> Self {
        Self::IllegalState {
            reason: reason.into(),
        }
    }

    pub fn invalid_url(input: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidUrl {
            input: input.into(),
            reason: reason.into(),
        }
    }

    pub fn directory_destroyed(service: impl Into<String>) -> Self {
        Self::DirectoryDestroyed {
            service: service.into(),
        }
    }

    pub fn no_available_invoker(
        service: impl Into<String>,
        method: impl Into<String>,
        routers: Vec<String>,
    ) -> Self {
        Self::NoAvailableInvoker {
            service: service.into(),
            method: method.into(),
            routers,
        }
    }

    /// 创建传输层调用错误（可重试）
    pub fn transport_failure(
        service: impl Into<String>,
        method: impl Into<String>,
        endpoint: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::Invocation {
            service: service.into(),
            method: method.into(),
            endpoint: endpoint.into(),
            reason: reason.into(),
            retryable: true,
        }
    }

    /// 创建业务层调用错误（不可重试）
    pub fn business_failure(
        service: impl Into<String>,
        method: impl Into<String>,
        endpoint: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::Invocation {
            service: service.into(),
            method: method.into(),
            endpoint: endpoint.into(),
            reason: reason.into(),
            retryable: false,
        }
    }

    pub fn timeout(
        service: impl Into<String>,
        method: impl Into<String>,
        elapsed: Duration,
    ) -> Self {
        Self::Timeout {
            service: service.into(),
            method: method.into(),
            elapsed,
        }
    }

    pub fn cluster_failed(
        service: impl Into<String>,
        method: impl Into<String>,
        attempts: usize,
        endpoints: Vec<String>,
        last: &RpcError,
    ) -> Self {
        Self::ClusterFailed {
            service: service.into(),
            method: method.into(),
            attempts,
            endpoints,
            last: last.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(RpcError::transport_failure("s", "m", "h:1", "refused").is_retryable());
        assert!(RpcError::timeout("s", "m", Duration::from_millis(100)).is_retryable());
        assert!(!RpcError::business_failure("s", "m", "h:1", "bad input").is_retryable());
        assert!(!RpcError::extension_not_found("LoadBalance", "x").is_retryable());
        assert!(!RpcError::illegal_state("gone").is_retryable());
    }

    #[test]
    fn test_cluster_failed_lists_endpoints() {
        let err = RpcError::ClusterFailed {
            service: "demo.Service".into(),
            method: "sayHello".into(),
            attempts: 3,
            endpoints: vec!["a:1".into(), "b:2".into(), "c:3".into()],
            last: "connection refused".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("demo.Service.sayHello"));
        assert!(msg.contains("a:1, b:2, c:3"));
        assert!(msg.contains("connection refused"));
    }
}
