/// 服务目录
///
/// 目录维护一个逻辑服务当前存活的 Invoker 集合：注册中心推送地址变更，
/// 调用线程并发读取快照。读路径完全无锁（copy-on-write + 原子交换），
/// 写路径按 URL 做差量，未变化的端点复用既有 Invoker，消失的端点被销毁。

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::{
    error::RpcError,
    invocation::Invocation,
    invoker::{InvokerFactory, InvokerRef},
    url::Url,
};

/// 一个逻辑服务的 Invoker 目录
pub trait Directory: Send + Sync {
    /// 逻辑服务标识
    fn service_key(&self) -> &str;

    /// 消费方 URL（承载集群/路由/负载均衡等配置）
    fn url(&self) -> &Url;

    /// 返回当前 Invoker 快照
    ///
    /// 与 `notify` 并发安全：读取方看到的永远是完整的一代快照。
    fn list(&self, invocation: &Invocation) -> Result<Vec<InvokerRef>, RpcError>;

    /// 当前快照中的端点数（不做路由过滤）
    fn size(&self) -> usize;

    /// 目录是否仍可提供至少一个可用 Invoker
    fn is_available(&self) -> bool;

    /// 销毁目录及其持有的全部 Invoker
    fn destroy(&self);
}

/// 固定列表目录
///
/// 用于直连场景和测试：Invoker 集合在构造时给定，不再变化。
pub struct StaticDirectory {
    url: Url,
    invokers: Vec<InvokerRef>,
    destroyed: AtomicBool,
}

impl StaticDirectory {
    pub fn new(url: Url, invokers: Vec<InvokerRef>) -> Self {
        Self {
            url,
            invokers,
            destroyed: AtomicBool::new(false),
        }
    }
}

impl Directory for StaticDirectory {
    fn service_key(&self) -> &str {
        self.url.service_key()
    }

    fn url(&self) -> &Url {
        &self.url
    }

    fn list(&self, _invocation: &Invocation) -> Result<Vec<InvokerRef>, RpcError> {
        if self.destroyed.load(Ordering::SeqCst) {
            return Err(RpcError::directory_destroyed(self.service_key()));
        }
        Ok(self.invokers.clone())
    }

    fn size(&self) -> usize {
        if self.destroyed.load(Ordering::SeqCst) {
            0
        } else {
            self.invokers.len()
        }
    }

    fn is_available(&self) -> bool {
        !self.destroyed.load(Ordering::SeqCst) && self.invokers.iter().any(|i| i.is_available())
    }

    fn destroy(&self) {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }
        for invoker in &self.invokers {
            invoker.destroy();
        }
    }
}

/// 注册中心驱动的动态目录
///
/// `notify` 接收新一代的提供方 URL 列表，与当前代做差量：
/// URL 完全相同的端点复用原 Invoker（保持对象同一性），
/// 新增端点经由 `InvokerFactory` 建立，消失的端点在新快照发布后销毁。
pub struct RegistryDirectory {
    url: Url,
    factory: Arc<dyn InvokerFactory>,
    /// 读路径快照
    snapshot: ArcSwap<Vec<InvokerRef>>,
    /// 写路径状态：URL 串 -> Invoker，仅 notify / destroy 持锁访问
    by_url: Mutex<HashMap<String, InvokerRef>>,
    destroyed: AtomicBool,
}

impl RegistryDirectory {
    pub fn new(url: Url, factory: Arc<dyn InvokerFactory>) -> Self {
        Self {
            url,
            factory,
            snapshot: ArcSwap::from_pointee(Vec::new()),
            by_url: Mutex::new(HashMap::new()),
            destroyed: AtomicBool::new(false),
        }
    }

    /// 注册中心推送的地址变更入口
    ///
    /// 单个端点建连失败只跳过该端点并告警，不影响其余端点发布。
    pub fn notify(&self, urls: Vec<Url>) -> Result<(), RpcError> {
        if self.destroyed.load(Ordering::SeqCst) {
            return Err(RpcError::directory_destroyed(self.service_key()));
        }

        let mut by_url = self.by_url.lock();
        // destroy 可能在上面的检查与拿锁之间完成，它的清扫不会再来第二次，
        // 持锁后必须复核，否则这里建出的 Invoker 将无人销毁
        if self.destroyed.load(Ordering::SeqCst) {
            return Err(RpcError::directory_destroyed(self.service_key()));
        }
        let mut next: HashMap<String, InvokerRef> = HashMap::with_capacity(urls.len());
        let mut next_list: Vec<InvokerRef> = Vec::with_capacity(urls.len());

        for url in urls {
            let key = url.to_string();
            if next.contains_key(&key) {
                continue;
            }
            if let Some(existing) = by_url.get(&key) {
                // URL 未变化，复用原 Invoker
                next_list.push(existing.clone());
                next.insert(key, existing.clone());
                continue;
            }
            match self.factory.create(&url) {
                Ok(invoker) => {
                    next_list.push(invoker.clone());
                    next.insert(key, invoker);
                }
                Err(e) => {
                    warn!(service = %self.service_key(), url = %key, error = %e,
                        "failed to create invoker for notified url, endpoint skipped");
                }
            }
        }

        // 先发布新快照，再销毁消失的端点，读取方不会看到半新半旧的集合
        let stale: Vec<InvokerRef> = by_url
            .iter()
            .filter(|(key, _)| !next.contains_key(*key))
            .map(|(_, invoker)| invoker.clone())
            .collect();
        debug!(service = %self.service_key(), total = next_list.len(), stale = stale.len(),
            "directory snapshot updated");

        self.snapshot.store(Arc::new(next_list));
        *by_url = next;
        drop(by_url);

        for invoker in stale {
            invoker.destroy();
        }
        Ok(())
    }

    /// 当前快照大小
    pub fn len(&self) -> usize {
        self.snapshot.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Directory for RegistryDirectory {
    fn service_key(&self) -> &str {
        self.url.service_key()
    }

    fn url(&self) -> &Url {
        &self.url
    }

    fn list(&self, _invocation: &Invocation) -> Result<Vec<InvokerRef>, RpcError> {
        if self.destroyed.load(Ordering::SeqCst) {
            return Err(RpcError::directory_destroyed(self.service_key()));
        }
        Ok(self.snapshot.load().as_ref().clone())
    }

    fn size(&self) -> usize {
        self.len()
    }

    fn is_available(&self) -> bool {
        !self.destroyed.load(Ordering::SeqCst)
            && self.snapshot.load().iter().any(|i| i.is_available())
    }

    fn destroy(&self) {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }
        let mut by_url = self.by_url.lock();
        self.snapshot.store(Arc::new(Vec::new()));
        for (_, invoker) in by_url.drain() {
            invoker.destroy();
        }
    }
}
