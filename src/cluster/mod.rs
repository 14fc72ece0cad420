/// 集群容错层
///
/// `Cluster` 把一个目录（多个远端 Invoker）合成为单个虚拟 Invoker，
/// 失败处理策略由具体变体决定：failover 重试、failfast 快速失败、
/// failsafe 吞掉异常、failback 后台补偿、forking 并行首胜、
/// broadcast 全量广播、available 首个可用、migration 双注册迁移。
///
/// 公共流水线收敛在 `ClusterSupport`：目录快照 → 路由链过滤 →
/// 自适应负载均衡选择（排除已尝试的端点）→ 单次调用超时控制。

pub mod available;
pub mod broadcast;
pub mod failback;
pub mod failfast;
pub mod failover;
pub mod failsafe;
pub mod forking;
pub mod migration;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::{
    directory::Directory,
    error::RpcError,
    extension::{AdaptiveExtension, ExtensionScope},
    invocation::{Invocation, RpcResult},
    invoker::{Invoker, InvokerRef},
    loadbalance::LoadBalance,
    router::RouterChain,
    url::Url,
};

pub use available::AvailableCluster;
pub use broadcast::BroadcastCluster;
pub use failback::FailbackCluster;
pub use failfast::FailfastCluster;
pub use failover::FailoverCluster;
pub use failsafe::FailsafeCluster;
pub use forking::ForkingCluster;
pub use migration::{MigrationCluster, MigrationClusterInvoker, MigrationComparator, RatioComparator};

/// 自适应分发探测的 URL 参数
pub const CLUSTER_KEY: &str = "cluster";
/// 默认集群策略
pub const DEFAULT_CLUSTER: &str = "failover";
/// 单次调用超时参数（毫秒，支持方法级覆盖）
pub const TIMEOUT_KEY: &str = "timeout";
/// 默认单次调用超时
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(1000);

/// 把目录合成为虚拟 Invoker 的集群策略
pub trait Cluster: Send + Sync {
    fn name(&self) -> &'static str;

    /// 合并目录，返回承载容错语义的虚拟 Invoker
    fn join(&self, directory: Arc<dyn Directory>) -> Result<InvokerRef, RpcError>;
}

/// 各集群变体共享的调用流水线
///
/// 路由链在 join 时按消费方 URL 构建一次，之后每次调用复用。
#[derive(Clone)]
pub struct ClusterSupport {
    directory: Arc<dyn Directory>,
    chain: RouterChain,
    loadbalance: AdaptiveExtension<dyn LoadBalance>,
}

impl ClusterSupport {
    pub fn new(scope: &ExtensionScope, directory: Arc<dyn Directory>) -> Result<Self, RpcError> {
        let chain = RouterChain::build(scope, directory.url())?;
        Ok(Self {
            directory,
            chain,
            loadbalance: scope.adaptive::<dyn LoadBalance>(),
        })
    }

    pub fn directory(&self) -> &Arc<dyn Directory> {
        &self.directory
    }

    pub fn url(&self) -> &Url {
        self.directory.url()
    }

    /// 目录快照经路由链过滤后的候选列表
    ///
    /// 过滤结果为空视为调用失败（带上生效的路由器名便于排查）。
    pub fn list(&self, invocation: &Invocation) -> Result<Vec<InvokerRef>, RpcError> {
        let invokers = self.directory.list(invocation)?;
        let routed = self.chain.route(invokers, self.directory.url(), invocation);
        if routed.is_empty() {
            return Err(RpcError::no_available_invoker(
                invocation.service(),
                invocation.method(),
                self.chain.router_names(),
            ));
        }
        Ok(routed)
    }

    /// 通过自适应负载均衡选择一个端点
    ///
    /// `excluded` 是本次调用已经尝试过的端点；排除后无候选时
    /// 回落到完整列表（重试宁可命中旧端点也不能无端失败）。
    pub fn select(
        &self,
        invokers: &[InvokerRef],
        invocation: &Invocation,
        excluded: &[InvokerRef],
    ) -> Result<InvokerRef, RpcError> {
        let lb = self
            .loadbalance
            .resolve_for_method(self.url(), invocation.method())?;
        let fresh: Vec<InvokerRef> = invokers
            .iter()
            .filter(|i| !excluded.iter().any(|e| Arc::ptr_eq(e, i)))
            .cloned()
            .collect();
        if fresh.is_empty() {
            lb.select(invokers, self.url(), invocation)
        } else {
            lb.select(&fresh, self.url(), invocation)
        }
    }

    /// 本次调用的超时预算
    pub fn call_timeout(&self, invocation: &Invocation) -> Duration {
        self.url()
            .method_parameter_duration(invocation.method(), TIMEOUT_KEY, DEFAULT_TIMEOUT)
    }

    /// 带超时地调用单个端点
    pub async fn invoke_endpoint(
        &self,
        invoker: &InvokerRef,
        invocation: &Invocation,
    ) -> Result<RpcResult, RpcError> {
        let budget = self.call_timeout(invocation);
        match tokio::time::timeout(budget, invoker.invoke(invocation)).await {
            Ok(result) => result,
            Err(_) => Err(RpcError::timeout(
                invocation.service(),
                invocation.method(),
                budget,
            )),
        }
    }
}

/// 集群变体的调用策略
#[async_trait]
pub trait ClusterStrategy: Send + Sync {
    async fn invoke(
        &self,
        support: &ClusterSupport,
        invocation: &Invocation,
    ) -> Result<RpcResult, RpcError>;
}

/// 策略 + 共享流水线组成的虚拟 Invoker
pub struct ClusterInvoker<S> {
    support: ClusterSupport,
    strategy: S,
}

impl<S: ClusterStrategy> ClusterInvoker<S> {
    pub fn new(support: ClusterSupport, strategy: S) -> Self {
        Self { support, strategy }
    }
}

#[async_trait]
impl<S: ClusterStrategy> Invoker for ClusterInvoker<S> {
    fn url(&self) -> &Url {
        self.support.url()
    }

    fn is_available(&self) -> bool {
        self.support.directory().is_available()
    }

    async fn invoke(&self, invocation: &Invocation) -> Result<RpcResult, RpcError> {
        self.strategy.invoke(&self.support, invocation).await
    }

    fn destroy(&self) {
        self.support.directory().destroy();
    }
}

/// 调用耗时日志包装器
///
/// 作为 `Cluster` 接口的 wrapper 注册：所有 join 出来的虚拟 Invoker
/// 都会被再包一层耗时记录。
pub struct LoggingClusterWrapper {
    inner: Arc<dyn Cluster>,
}

impl LoggingClusterWrapper {
    pub fn new(inner: Arc<dyn Cluster>) -> Self {
        Self { inner }
    }
}

impl Cluster for LoggingClusterWrapper {
    fn name(&self) -> &'static str {
        self.inner.name()
    }

    fn join(&self, directory: Arc<dyn Directory>) -> Result<InvokerRef, RpcError> {
        let invoker = self.inner.join(directory)?;
        Ok(Arc::new(LoggingInvoker {
            cluster: self.inner.name(),
            inner: invoker,
        }))
    }
}

struct LoggingInvoker {
    cluster: &'static str,
    inner: InvokerRef,
}

#[async_trait]
impl Invoker for LoggingInvoker {
    fn url(&self) -> &Url {
        self.inner.url()
    }

    fn is_available(&self) -> bool {
        self.inner.is_available()
    }

    async fn invoke(&self, invocation: &Invocation) -> Result<RpcResult, RpcError> {
        let started = std::time::Instant::now();
        let result = self.inner.invoke(invocation).await;
        let elapsed = started.elapsed();
        match &result {
            Ok(_) => debug!(
                cluster = self.cluster,
                service = %invocation.service(),
                method = %invocation.method(),
                ?elapsed,
                "cluster invocation completed"
            ),
            Err(e) => warn!(
                cluster = self.cluster,
                service = %invocation.service(),
                method = %invocation.method(),
                ?elapsed,
                error = %e,
                "cluster invocation failed"
            ),
        }
        result
    }

    fn destroy(&self) {
        self.inner.destroy();
    }
}
