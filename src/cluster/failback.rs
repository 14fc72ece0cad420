/// Failback：失败自动恢复
///
/// 首次调用失败时立即返回空结果，同时把这次调用放入后台补偿：
/// 固定周期重试，每轮重新走一遍路由 + 负载均衡（端点可能已恢复
/// 或被替换），重试 `failbackretries` 次后放弃。适合消息通知这类
/// 最终送达即可的场景。

use std::sync::Arc;

use async_trait::async_trait;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::{
    directory::Directory,
    error::RpcError,
    extension::ExtensionScope,
    invocation::{Invocation, RpcResult},
    invoker::InvokerRef,
};

use super::{Cluster, ClusterInvoker, ClusterStrategy, ClusterSupport};

/// 后台补偿次数参数
pub const FAILBACK_RETRIES_KEY: &str = "failbackretries";
/// 默认补偿次数
pub const DEFAULT_FAILBACK_RETRIES: i64 = 3;
/// 补偿周期
pub const RETRY_PERIOD: std::time::Duration = std::time::Duration::from_secs(5);

pub struct FailbackCluster {
    scope: ExtensionScope,
}

impl FailbackCluster {
    pub fn new(scope: ExtensionScope) -> Self {
        Self { scope }
    }
}

impl Cluster for FailbackCluster {
    fn name(&self) -> &'static str {
        "failback"
    }

    fn join(&self, directory: Arc<dyn Directory>) -> Result<InvokerRef, RpcError> {
        let support = ClusterSupport::new(&self.scope, directory)?;
        Ok(Arc::new(ClusterInvoker::new(support, FailbackStrategy)))
    }
}

struct FailbackStrategy;

fn schedule_retry(support: ClusterSupport, invocation: Invocation, retries: usize) {
    tokio::spawn(async move {
        for attempt in 1..=retries {
            sleep(RETRY_PERIOD).await;
            let outcome = async {
                let invokers = support.list(&invocation)?;
                let invoker = support.select(&invokers, &invocation, &[])?;
                support.invoke_endpoint(&invoker, &invocation).await
            }
            .await;
            match outcome {
                Ok(_) => {
                    info!(
                        service = %invocation.service(),
                        method = %invocation.method(),
                        attempt,
                        "failback retry succeeded"
                    );
                    return;
                }
                Err(e) => warn!(
                    service = %invocation.service(),
                    method = %invocation.method(),
                    attempt,
                    error = %e,
                    "failback retry failed"
                ),
            }
        }
        warn!(
            service = %invocation.service(),
            method = %invocation.method(),
            retries,
            "failback retries exhausted, giving up"
        );
    });
}

#[async_trait]
impl ClusterStrategy for FailbackStrategy {
    async fn invoke(
        &self,
        support: &ClusterSupport,
        invocation: &Invocation,
    ) -> Result<RpcResult, RpcError> {
        let outcome = async {
            let invokers = support.list(invocation)?;
            let invoker = support.select(&invokers, invocation, &[])?;
            support.invoke_endpoint(&invoker, invocation).await
        }
        .await;

        match outcome {
            Ok(result) => Ok(result),
            Err(e) => {
                let retries = support
                    .url()
                    .parameter_i64(FAILBACK_RETRIES_KEY, DEFAULT_FAILBACK_RETRIES)
                    .max(0) as usize;
                warn!(
                    service = %invocation.service(),
                    method = %invocation.method(),
                    error = %e,
                    retries,
                    "invocation failed, scheduling background failback"
                );
                schedule_retry(support.clone(), invocation.clone(), retries);
                Ok(RpcResult::empty())
            }
        }
    }
}
