/// Failsafe：失败安全
///
/// 任何失败（包括路由后无候选）都被吞掉并记一条 warn 日志，
/// 调用方拿到空结果。适合审计、打点这类丢了也不影响主流程的旁路。

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

pub struct FailsafeCluster {
    scope: ExtensionScope,
}

impl FailsafeCluster {
    pub fn new(scope: ExtensionScope) -> Self {
        Self { scope }
    }
}

impl Cluster for FailsafeCluster {
    fn name(&self) -> &'static str {
        "failsafe"
    }

    fn join(&self, directory: Arc<dyn Directory>) -> Result<InvokerRef, RpcError> {
        let support = ClusterSupport::new(&self.scope, directory)?;
        Ok(Arc::new(ClusterInvoker::new(support, FailsafeStrategy)))
    }
}

struct FailsafeStrategy;

impl FailsafeStrategy {
    async fn try_invoke(
        support: &ClusterSupport,
        invocation: &Invocation,
    ) -> Result<RpcResult, RpcError> {
        let invokers = support.list(invocation)?;
        let invoker = support.select(&invokers, invocation, &[])?;
        support.invoke_endpoint(&invoker, invocation).await
    }
}

#[async_trait]
impl ClusterStrategy for FailsafeStrategy {
    async fn invoke(
        &self,
        support: &ClusterSupport,
        invocation: &Invocation,
    ) -> Result<RpcResult, RpcError> {
        match Self::try_invoke(support, invocation).await {
            Ok(result) => Ok(result),
            Err(e) => {
                warn!(
                    service = %invocation.service(),
                    method = %invocation.method(),
                    error = %e,
                    "failsafe swallowed invocation failure"
                );
                Ok(RpcResult::empty())
            }
        }
    }
}
