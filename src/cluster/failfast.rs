/// Failfast：快速失败
///
/// 只发起一次调用，失败立即上抛。适合非幂等操作（写入、扣减），
/// 由调用方自行决定是否补偿。

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

pub struct FailfastCluster {
    scope: ExtensionScope,
}

impl FailfastCluster {
    pub fn new(scope: ExtensionScope) -> Self {
        Self { scope }
    }
}

impl Cluster for FailfastCluster {
    fn name(&self) -> &'static str {
        "failfast"
    }

    fn join(&self, directory: Arc<dyn Directory>) -> Result<InvokerRef, RpcError> {
        let support = ClusterSupport::new(&self.scope, directory)?;
        Ok(Arc::new(ClusterInvoker::new(support, FailfastStrategy)))
    }
}

struct FailfastStrategy;

#[async_trait]
impl ClusterStrategy for FailfastStrategy {
    async fn invoke(
        &self,
        support: &ClusterSupport,
        invocation: &Invocation,
    ) -> Result<RpcResult, RpcError> {
        let invokers = support.list(invocation)?;
        let invoker = support.select(&invokers, invocation, &[])?;
        support.invoke_endpoint(&invoker, invocation).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::tests_support::support_over;
    use crate::invoker::tests_support::TestInvoker;

    #[tokio::test]
    async fn test_single_attempt_even_on_retryable_failure() {
        let bad = TestInvoker::failing("dubbo://bad:1/demo.Service", true);
        let support = support_over(
            "consumer://0.0.0.0/demo.Service",
            vec![bad.clone() as InvokerRef],
        );

        let inv = Invocation::new("demo.Service", "say");
        let err = FailfastStrategy.invoke(&support, &inv).await.unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(bad.calls(), 1);
    }
}
