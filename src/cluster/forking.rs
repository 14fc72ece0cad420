/// Forking：并行调用，首胜即返
///
/// 选出 `forks` 个互不相同的端点并行发起调用，第一个成功的结果
/// 立即返回并取消其余任务；全部失败时返回最后一个错误。
/// 用带宽换时延，适合实时性要求高的只读调用。

use std::sync::Arc;

use async_trait::async_trait;
use tokio::task::JoinSet;

use crate::{
    directory::Directory,
    error::RpcError,
    extension::ExtensionScope,
    invocation::{Invocation, RpcResult},
    invoker::InvokerRef,
};

use super::{Cluster, ClusterInvoker, ClusterStrategy, ClusterSupport};

/// 并行度参数
pub const FORKS_KEY: &str = "forks";
/// 默认并行度
pub const DEFAULT_FORKS: i64 = 2;

pub struct ForkingCluster {
    scope: ExtensionScope,
}

impl ForkingCluster {
    pub fn new(scope: ExtensionScope) -> Self {
        Self { scope }
    }
}

impl Cluster for ForkingCluster {
    fn name(&self) -> &'static str {
        "forking"
    }

    fn join(&self, directory: Arc<dyn Directory>) -> Result<InvokerRef, RpcError> {
        let support = ClusterSupport::new(&self.scope, directory)?;
        Ok(Arc::new(ClusterInvoker::new(support, ForkingStrategy)))
    }
}

struct ForkingStrategy;

#[async_trait]
impl ClusterStrategy for ForkingStrategy {
    async fn invoke(
        &self,
        support: &ClusterSupport,
        invocation: &Invocation,
    ) -> Result<RpcResult, RpcError> {
        let invokers = support.list(invocation)?;
        let forks = support
            .url()
            .method_parameter_i64(invocation.method(), FORKS_KEY, DEFAULT_FORKS)
            .max(1) as usize;

        // 选出 forks 个互不相同的端点；候选不足时有多少用多少
        let mut selected: Vec<InvokerRef> = Vec::with_capacity(forks.min(invokers.len()));
        while selected.len() < forks && selected.len() < invokers.len() {
            let invoker = support.select(&invokers, invocation, &selected)?;
            if selected.iter().any(|s| Arc::ptr_eq(s, &invoker)) {
                break;
            }
            selected.push(invoker);
        }

        let budget = support.call_timeout(invocation);
        let mut set = JoinSet::new();
        for invoker in selected {
            let invocation = invocation.clone();
            set.spawn(async move {
                let endpoint = invoker.url().address();
                let outcome = match tokio::time::timeout(budget, invoker.invoke(&invocation)).await
                {
                    Ok(result) => result,
                    Err(_) => Err(RpcError::timeout(
                        invocation.service(),
                        invocation.method(),
                        budget,
                    )),
                };
                (endpoint, outcome)
            });
        }

        let mut endpoints: Vec<String> = Vec::new();
        let mut attempts = 0usize;
        let mut last: Option<RpcError> = None;
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((_, Ok(result))) => {
                    set.abort_all();
                    return Ok(result);
                }
                Ok((endpoint, Err(e))) => {
                    attempts += 1;
                    endpoints.push(endpoint);
                    last = Some(e);
                }
                // 被取消的任务不计入
                Err(_) => {}
            }
        }

        let last = last.unwrap_or_else(|| {
            RpcError::illegal_state("forking finished without any attempt")
        });
        Err(RpcError::cluster_failed(
            invocation.service(),
            invocation.method(),
            attempts,
            endpoints,
            &last,
        ))
    }
}
