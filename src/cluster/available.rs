/// Available：调用首个可用端点
///
/// 不经过负载均衡，顺序找到第一个 `is_available()` 的端点直接调用；
/// 一个都没有时报 `NoAvailableInvoker`。

use std::sync::Arc;

use async_trait::async_trait;

use crate::{
    directory::Directory,
    error::RpcError,
    extension::ExtensionScope,
    invocation::{Invocation, RpcResult},
    invoker::InvokerRef,
};

use super::{Cluster, ClusterInvoker, ClusterStrategy, ClusterSupport};

pub struct AvailableCluster {
    scope: ExtensionScope,
}

impl AvailableCluster {
    pub fn new(scope: ExtensionScope) -> Self {
        Self { scope }
    }
}

impl Cluster for AvailableCluster {
    fn name(&self) -> &'static str {
        "available"
    }

    fn join(&self, directory: Arc<dyn Directory>) -> Result<InvokerRef, RpcError> {
        let support = ClusterSupport::new(&self.scope, directory)?;
        Ok(Arc::new(ClusterInvoker::new(support, AvailableStrategy)))
    }
}

struct AvailableStrategy;

#[async_trait]
impl ClusterStrategy for AvailableStrategy {
    async fn invoke(
        &self,
        support: &ClusterSupport,
        invocation: &Invocation,
    ) -> Result<RpcResult, RpcError> {
        let invokers = support.list(invocation)?;
        for invoker in &invokers {
            if invoker.is_available() {
                return support.invoke_endpoint(invoker, invocation).await;
            }
        }
        Err(RpcError::no_available_invoker(
            invocation.service(),
            invocation.method(),
            Vec::new(),
        ))
    }
}
