/// rpcmesh - 扩展加载与集群调用核心
///
/// 提供两块能力：一是显式作用域的扩展加载体系（命名扩展、单例缓存、
/// 包装器链、激活选择、按 URL 自适应分发），二是建立在其上的集群调用
/// 链路（服务目录 → 路由链 → 负载均衡 → 容错策略）。
/// 所有能力接口都以扩展表的形式注册，没有任何全局静态状态。

// 基础类型
pub mod error;
pub mod invocation;
pub mod invoker;
pub mod url;

// 扩展加载
pub mod extension;

// 集群调用链路
pub mod cluster;
pub mod directory;
pub mod loadbalance;
pub mod router;

// 常用类型的重导出
pub use cluster::{Cluster, ClusterSupport, LoggingClusterWrapper, CLUSTER_KEY, DEFAULT_CLUSTER};
pub use directory::{Directory, RegistryDirectory, StaticDirectory};
pub use error::RpcError;
pub use extension::{
    ActivateMeta, AdaptiveExtension, ExtensionScope, ExtensionTable,
};
pub use invocation::{Invocation, RpcResult};
pub use invoker::{BaseInvoker, Invoker, InvokerFactory, InvokerRef};
pub use loadbalance::{LoadBalance, LOADBALANCE_KEY};
pub use router::{Router, RouterChain, RouterFactory};
pub use url::Url;

/// 统一的 Result 别名
pub type Result<T> = std::result::Result<T, RpcError>;

use std::sync::Arc;

use cluster::{
    AvailableCluster, BroadcastCluster, FailbackCluster, FailfastCluster, FailoverCluster,
    FailsafeCluster, ForkingCluster, MigrationCluster,
};
use loadbalance::{ConsistentHashLoadBalance, RandomLoadBalance, RoundRobinLoadBalance};
use router::{
    condition::RULE_KEY, mesh::MESH_RULE_KEY, ConditionRouterFactory, MeshRouterFactory,
    TagRouterFactory,
};

/// 带全套内置扩展的作用域
///
/// 注册三张扩展表：负载均衡（默认 random，按 URL 参数 `loadbalance`
/// 自适应分发）、集群策略（默认 failover，按 `cluster` 分发，叠加
/// 调用耗时日志包装器）、路由工厂（消费方组的激活扩展）。
pub fn default_scope() -> ExtensionScope {
    let scope = ExtensionScope::new();

    scope
        .register(
            ExtensionTable::<dyn LoadBalance>::builder("LoadBalance")
                .default_name("random")
                .adaptive_keys([LOADBALANCE_KEY])
                .extension("random", |_| {
                    Ok(Arc::new(RandomLoadBalance) as Arc<dyn LoadBalance>)
                })
                .extension("roundrobin", |_| Ok(Arc::new(RoundRobinLoadBalance::new())))
                .extension("consistenthash", |_| {
                    Ok(Arc::new(ConsistentHashLoadBalance::new()))
                })
                .build(),
        )
        .expect("fresh scope cannot hold a LoadBalance table yet");

    scope
        .register(
            ExtensionTable::<dyn Cluster>::builder("Cluster")
                .default_name(DEFAULT_CLUSTER)
                .adaptive_keys([CLUSTER_KEY])
                .extension("failover", |scope| {
                    Ok(Arc::new(FailoverCluster::new(scope.clone())) as Arc<dyn Cluster>)
                })
                .extension("failfast", |scope| {
                    Ok(Arc::new(FailfastCluster::new(scope.clone())))
                })
                .extension("failsafe", |scope| {
                    Ok(Arc::new(FailsafeCluster::new(scope.clone())))
                })
                .extension("failback", |scope| {
                    Ok(Arc::new(FailbackCluster::new(scope.clone())))
                })
                .extension("forking", |scope| {
                    Ok(Arc::new(ForkingCluster::new(scope.clone())))
                })
                .extension("broadcast", |scope| {
                    Ok(Arc::new(BroadcastCluster::new(scope.clone())))
                })
                .extension("available", |scope| {
                    Ok(Arc::new(AvailableCluster::new(scope.clone())))
                })
                .extension("migration", |scope| {
                    Ok(Arc::new(MigrationCluster::new(scope.clone())))
                })
                .wrapper(|inner, _| Ok(Arc::new(LoggingClusterWrapper::new(inner))))
                .build(),
        )
        .expect("fresh scope cannot hold a Cluster table yet");

    scope
        .register(
            ExtensionTable::<dyn RouterFactory>::builder("RouterFactory")
                .activate_extension(
                    "tag",
                    ActivateMeta::new().group("consumer").order(100),
                    |_| Ok(Arc::new(TagRouterFactory) as Arc<dyn RouterFactory>),
                )
                .activate_extension(
                    "condition",
                    ActivateMeta::new()
                        .group("consumer")
                        .value_key(RULE_KEY)
                        .order(200),
                    |_| Ok(Arc::new(ConditionRouterFactory)),
                )
                .activate_extension(
                    "mesh",
                    ActivateMeta::new()
                        .group("consumer")
                        .value_key(MESH_RULE_KEY)
                        .order(300),
                    |_| Ok(Arc::new(MeshRouterFactory)),
                )
                .build(),
        )
        .expect("fresh scope cannot hold a RouterFactory table yet");

    scope
}
