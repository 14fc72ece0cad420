/// Failover：失败自动切换
///
/// 默认集群策略。可重试的失败（传输失败、超时）切换到未尝试过的
/// 端点重试，`retries` 参数控制额外尝试次数（支持方法级覆盖）；
/// 业务失败立即上抛，重试只会放大损失。

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::{
    directory::Directory,
    error::RpcError,
    extension::ExtensionScope,
    invocation::{Invocation, RpcResult},
    invoker::InvokerRef,
};

use super::{Cluster, ClusterInvoker, ClusterStrategy, ClusterSupport};

/// 额外重试次数参数
pub const RETRIES_KEY: &str = "retries";
/// 默认额外重试次数
pub const DEFAULT_RETRIES: i64 = 2;

pub struct FailoverCluster {
    scope: ExtensionScope,
}

impl FailoverCluster {
    pub fn new(scope: ExtensionScope) -> Self {
        Self { scope }
    }
}

impl Cluster for FailoverCluster {
    fn name(&self) -> &'static str {
        "failover"
    }

    fn join(&self, directory: Arc<dyn Directory>) -> Result<InvokerRef, RpcError> {
        let support = ClusterSupport::new(&self.scope, directory)?;
        Ok(Arc::new(ClusterInvoker::new(support, FailoverStrategy)))
    }
}

struct FailoverStrategy;

#[async_trait]
impl ClusterStrategy for FailoverStrategy {
    async fn invoke(
        &self,
        support: &ClusterSupport,
        invocation: &Invocation,
    ) -> Result<RpcResult, RpcError> {
        let retries = support
            .url()
            .method_parameter_i64(invocation.method(), RETRIES_KEY, DEFAULT_RETRIES)
            .max(0) as usize;

        let mut invokers = support.list(invocation)?;
        let mut tried: Vec<InvokerRef> = Vec::new();
        let mut endpoints: Vec<String> = Vec::new();
        let mut last: Option<RpcError> = None;

        for attempt in 0..=retries {
            // 重试前重新取列表，拿到拓扑变更后的最新端点
            if attempt > 0 {
                invokers = support.list(invocation)?;
            }
            let invoker = support.select(&invokers, invocation, &tried)?;
            tried.push(invoker.clone());
            endpoints.push(invoker.url().address());

            match support.invoke_endpoint(&invoker, invocation).await {
                Ok(result) => {
                    if attempt > 0 {
                        info!(
                            service = %invocation.service(),
                            method = %invocation.method(),
                            attempt = attempt + 1,
                            endpoint = %invoker.url().address(),
                            "invocation recovered after retry"
                        );
                    }
                    return Ok(result);
                }
                Err(e) if e.is_retryable() => {
                    warn!(
                        service = %invocation.service(),
                        method = %invocation.method(),
                        attempt = attempt + 1,
                        endpoint = %invoker.url().address(),
                        error = %e,
                        "invocation attempt failed, will retry on another endpoint"
                    );
                    last = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        let last = last.unwrap_or_else(|| {
            RpcError::illegal_state("failover exhausted without recording an error")
        });
        Err(RpcError::cluster_failed(
            invocation.service(),
            invocation.method(),
            retries + 1,
            endpoints,
            &last,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::tests_support::support_over;
    use crate::invoker::tests_support::TestInvoker;

    #[tokio::test]
    async fn test_two_failures_then_success() {
        let bad1 = TestInvoker::failing("dubbo://bad1:1/demo.Service", true);
        let bad2 = TestInvoker::failing("dubbo://bad2:1/demo.Service", true);
        let good = TestInvoker::ok("dubbo://good:1/demo.Service");
        // 轮询按声明顺序依次选择，两个失败端点必然先于成功端点被命中
        let support = support_over(
            "consumer://0.0.0.0/demo.Service?retries=2&loadbalance=roundrobin",
            vec![
                bad1.clone() as InvokerRef,
                bad2.clone() as InvokerRef,
                good.clone() as InvokerRef,
            ],
        );

        let inv = Invocation::new("demo.Service", "say");
        let result = FailoverStrategy.invoke(&support, &inv).await.unwrap();
        assert!(!result.is_empty());
        // 每个失败端点恰好被尝试一次，第三次命中成功端点
        assert_eq!((bad1.calls(), bad2.calls(), good.calls()), (1, 1, 1));
    }

    #[tokio::test]
    async fn test_exhaustion_aggregates_endpoints() {
        let bad1 = TestInvoker::failing("dubbo://bad1:1/demo.Service", true);
        let bad2 = TestInvoker::failing("dubbo://bad2:1/demo.Service", true);
        let support = support_over(
            "consumer://0.0.0.0/demo.Service?retries=1",
            vec![bad1.clone() as InvokerRef, bad2.clone() as InvokerRef],
        );

        let inv = Invocation::new("demo.Service", "say");
        let err = FailoverStrategy.invoke(&support, &inv).await.unwrap_err();
        match err {
            RpcError::ClusterFailed {
                attempts, endpoints, ..
            } => {
                assert_eq!(attempts, 2);
                assert_eq!(endpoints.len(), 2);
                assert!(endpoints.contains(&"bad1:1".to_string()));
                assert!(endpoints.contains(&"bad2:1".to_string()));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_business_failure_is_not_retried() {
        let bad = TestInvoker::failing("dubbo://bad:1/demo.Service", false);
        let support = support_over(
            "consumer://0.0.0.0/demo.Service?retries=2",
            vec![bad.clone() as InvokerRef],
        );

        let inv = Invocation::new("demo.Service", "say");
        let err = FailoverStrategy.invoke(&support, &inv).await.unwrap_err();
        // 业务失败原样上抛，不会被包成 ClusterFailed
        assert!(matches!(err, RpcError::Invocation { retryable: false, .. }));
        assert_eq!(bad.calls(), 1);
    }

    #[tokio::test]
    async fn test_method_level_retries_override() {
        let bad = TestInvoker::failing("dubbo://bad:1/demo.Service", true);
        let support = support_over(
            "consumer://0.0.0.0/demo.Service?retries=2&say.retries=0",
            vec![bad.clone() as InvokerRef],
        );

        let inv = Invocation::new("demo.Service", "say");
        let err = FailoverStrategy.invoke(&support, &inv).await.unwrap_err();
        assert!(matches!(err, RpcError::ClusterFailed { attempts: 1, .. }));
        assert_eq!(bad.calls(), 1);
    }
}
