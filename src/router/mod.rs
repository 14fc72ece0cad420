/// 路由层
///
/// Router 在每次调用时对目录快照做过滤/重排，规则可热更新。
/// 路由器作为激活扩展注册（接口 `RouterFactory`），`RouterChain`
/// 按优先级串联激活的路由器。规则解析失败一律降级为放行，绝不让
/// 一条坏规则中断调用链路。

pub mod condition;
pub mod mesh;
pub mod tag;

use std::sync::Arc;

use crate::{
    error::RpcError,
    extension::ExtensionScope,
    invocation::Invocation,
    invoker::InvokerRef,
    url::Url,
};

pub use condition::{ConditionRouter, ConditionRouterFactory};
pub use mesh::{MeshRouter, MeshRouterFactory};
pub use tag::{TagRouter, TagRouterFactory};

/// 承载显式路由器列表的 URL 参数
pub const ROUTER_KEY: &str = "router";

/// 每调用一次的 Invoker 过滤器
pub trait Router: Send + Sync {
    /// 路由器名（用于诊断信息）
    fn name(&self) -> &'static str;

    /// 优先级，越小越先执行
    fn priority(&self) -> i32 {
        0
    }

    /// 过滤候选列表
    ///
    /// 约定：`force=false` 时过滤结果为空必须回退为入参列表，
    /// 不允许悄悄丢弃全部候选。
    fn route(
        &self,
        invokers: Vec<InvokerRef>,
        url: &Url,
        invocation: &Invocation,
    ) -> Vec<InvokerRef>;
}

/// 路由器工厂（激活扩展）：按服务的消费方 URL 创建带规则状态的路由器
pub trait RouterFactory: Send + Sync {
    fn create(&self, url: &Url) -> Result<Arc<dyn Router>, RpcError>;
}

/// 按优先级串联的路由链
#[derive(Clone)]
pub struct RouterChain {
    routers: Vec<Arc<dyn Router>>,
}

impl RouterChain {
    /// 直接从路由器列表构造（按优先级稳定排序）
    pub fn new(mut routers: Vec<Arc<dyn Router>>) -> Self {
        routers.sort_by_key(|r| r.priority());
        Self { routers }
    }

    /// 从作用域中激活的 `RouterFactory` 构建路由链
    pub fn build(scope: &ExtensionScope, url: &Url) -> Result<Self, RpcError> {
        let factories = scope.activated::<dyn RouterFactory>(url, ROUTER_KEY, "consumer")?;
        let mut routers = Vec::with_capacity(factories.len());
        for (_, factory) in factories {
            routers.push(factory.create(url)?);
        }
        Ok(Self::new(routers))
    }

    /// 依次应用所有路由器
    pub fn route(
        &self,
        mut invokers: Vec<InvokerRef>,
        url: &Url,
        invocation: &Invocation,
    ) -> Vec<InvokerRef> {
        for router in &self.routers {
            if invokers.is_empty() {
                break;
            }
            invokers = router.route(invokers, url, invocation);
        }
        invokers
    }

    /// 链上的路由器名（诊断用）
    pub fn router_names(&self) -> Vec<String> {
        self.routers.iter().map(|r| r.name().to_string()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.routers.is_empty()
    }
}
