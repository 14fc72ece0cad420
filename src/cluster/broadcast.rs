/// Broadcast：广播调用
///
/// 依次调用路由后的每一个端点，任何一个失败都会在扫完全部端点后
/// 上抛（取最后一个错误）；全部成功时返回最后一个端点的结果。
/// 用于通知所有提供方刷新本地状态（清缓存、更新配置）。

use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use crate::{
    directory::Directory,
    error::RpcError,
    extension::ExtensionScope,
    invocation::{Invocation, RpcResult},
    invoker::InvokerRef,
};

use super::{Cluster, ClusterInvoker, ClusterStrategy, ClusterSupport};

pub struct BroadcastCluster {
    scope: ExtensionScope,
}

impl BroadcastCluster {
    pub fn new(scope: ExtensionScope) -> Self {
        Self { scope }
    }
}

impl Cluster for BroadcastCluster {
    fn name(&self) -> &'static str {
        "broadcast"
    }

    fn join(&self, directory: Arc<dyn Directory>) -> Result<InvokerRef, RpcError> {
        let support = ClusterSupport::new(&self.scope, directory)?;
        Ok(Arc::new(ClusterInvoker::new(support, BroadcastStrategy)))
    }
}

struct BroadcastStrategy;

#[async_trait]
impl ClusterStrategy for BroadcastStrategy {
    async fn invoke(
        &self,
        support: &ClusterSupport,
        invocation: &Invocation,
    ) -> Result<RpcResult, RpcError> {
        let invokers = support.list(invocation)?;
        let mut result = RpcResult::empty();
        let mut last: Option<RpcError> = None;

        for invoker in &invokers {
            match support.invoke_endpoint(invoker, invocation).await {
                Ok(r) => result = r,
                Err(e) => {
                    warn!(
                        service = %invocation.service(),
                        method = %invocation.method(),
                        endpoint = %invoker.url().address(),
                        error = %e,
                        "broadcast to endpoint failed"
                    );
                    last = Some(e);
                }
            }
        }

        match last {
            Some(e) => Err(e),
            None => Ok(result),
        }
    }
}
