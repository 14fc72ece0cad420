use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use crate::{
    error::RpcError,
    invocation::{Invocation, RpcResult},
    url::Url,
};

/// 可调用端点的统一抽象
///
/// 这是协议层与集群层之间唯一的接口：协议实现负责把 `Invocation`
/// 发往远端并产出 `RpcResult`，集群层只通过该接口组合调用。
#[async_trait]
pub trait Invoker: Send + Sync {
    /// 该 Invoker 绑定的 URL（标识具体端点）
    fn url(&self) -> &Url;

    /// 端点当前是否可用
    fn is_available(&self) -> bool;

    /// 发起调用
    async fn invoke(&self, invocation: &Invocation) -> Result<RpcResult, RpcError>;

    /// 销毁，释放底层资源
    fn destroy(&self);
}

/// 共享所有权的 Invoker 引用
pub type InvokerRef = Arc<dyn Invoker>;

/// 协议边界：根据 URL 创建 Invoker
///
/// 目录收到注册中心推送的 URL 列表后，通过该工厂建立具体连接。
pub trait InvokerFactory: Send + Sync {
    fn create(&self, url: &Url) -> Result<InvokerRef, RpcError>;
}

impl<F> InvokerFactory for F
where
    F: Fn(&Url) -> Result<InvokerRef, RpcError> + Send + Sync,
{
    fn create(&self, url: &Url) -> Result<InvokerRef, RpcError> {
        self(url)
    }
}

/// Invoker 的基础实现骨架
///
/// 维护可用 / 已销毁两个状态位，供具体协议实现复用。
pub struct BaseInvoker {
    url: Url,
    available: AtomicBool,
    destroyed: AtomicBool,
}

impl BaseInvoker {
    pub fn new(url: Url) -> Self {
        Self {
            url,
            available: AtomicBool::new(true),
            destroyed: AtomicBool::new(false),
        }
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }

    pub fn destroy(&self) {
        self.destroyed.store(true, Ordering::SeqCst);
        self.available.store(false, Ordering::SeqCst);
    }
}

impl fmt::Display for BaseInvoker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Invoker")
            .field("protocol", &self.url.protocol())
            .field("address", &self.url.address())
            .field("service", &self.url.service_key())
            .finish()
    }
}

/// 测试用 Invoker，各模块的单元测试共享
#[cfg(test)]
pub(crate) mod tests_support {
    use std::sync::atomic::AtomicUsize;

    use super::*;

    type Handler = Box<dyn Fn(&Invocation) -> Result<RpcResult, RpcError> + Send + Sync>;

    pub(crate) struct TestInvoker {
        base: BaseInvoker,
        handler: Handler,
        calls: AtomicUsize,
    }

    impl TestInvoker {
        pub(crate) fn with_handler<F>(url: &str, handler: F) -> Arc<Self>
        where
            F: Fn(&Invocation) -> Result<RpcResult, RpcError> + Send + Sync + 'static,
        {
            Arc::new(Self {
                base: BaseInvoker::new(Url::parse(url).unwrap()),
                handler: Box::new(handler),
                calls: AtomicUsize::new(0),
            })
        }

        pub(crate) fn ok(url: &str) -> Arc<Self> {
            Self::with_handler(url, |_| Ok(RpcResult::new(serde_json::Value::from("ok"))))
        }

        pub(crate) fn failing(url: &str, retryable: bool) -> Arc<Self> {
            let endpoint = Url::parse(url).unwrap().address();
            Self::with_handler(url, move |inv| {
                if retryable {
                    Err(RpcError::transport_failure(
                        inv.service(),
                        inv.method(),
                        endpoint.clone(),
                        "connection refused",
                    ))
                } else {
                    Err(RpcError::business_failure(
                        inv.service(),
                        inv.method(),
                        endpoint.clone(),
                        "validation failed",
                    ))
                }
            })
        }

        pub(crate) fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        pub(crate) fn set_available(&self, available: bool) {
            self.base.set_available(available);
        }
    }

    #[async_trait]
    impl Invoker for TestInvoker {
        fn url(&self) -> &Url {
            self.base.url()
        }

        fn is_available(&self) -> bool {
            self.base.is_available()
        }

        async fn invoke(&self, invocation: &Invocation) -> Result<RpcResult, RpcError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            (self.handler)(invocation)
        }

        fn destroy(&self) {
            self.base.destroy();
        }
    }

    pub(crate) fn new_test_invoker(url: &str) -> InvokerRef {
        TestInvoker::ok(url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_invoker_lifecycle() {
        let invoker = BaseInvoker::new(Url::parse("dubbo://127.0.0.1:20880/demo.Service").unwrap());
        assert!(invoker.is_available());
        assert!(!invoker.is_destroyed());

        invoker.set_available(false);
        assert!(!invoker.is_available());
        invoker.set_available(true);

        invoker.destroy();
        assert!(invoker.is_destroyed());
        assert!(!invoker.is_available());
    }
}
