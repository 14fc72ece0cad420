/// Migration：双注册平滑迁移
///
/// 服务发现模型切换期间，同一服务会同时存在新旧两套目录
/// （例如接口级注册与应用级注册）。迁移 Invoker 同时持有两侧的
/// 集群 Invoker，由比较器决定何时把流量切到新侧：默认按两侧地址数
/// 的比值与 `migration.threshold` 比较。切换判定在稳定窗口
/// （`migration.window` 毫秒）内至多执行一次，且只升不降，避免
/// 地址抖动导致流量来回震荡。

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::info;

use crate::{
    directory::Directory,
    error::RpcError,
    extension::ExtensionScope,
    invocation::{Invocation, RpcResult},
    invoker::{Invoker, InvokerRef},
    url::Url,
};

use super::{Cluster, FailoverCluster};

/// 切换阈值参数（新侧地址数 / 旧侧地址数）
pub const MIGRATION_THRESHOLD_KEY: &str = "migration.threshold";
/// 默认切换阈值
pub const DEFAULT_MIGRATION_THRESHOLD: f64 = 0.8;
/// 稳定窗口参数（毫秒）
pub const MIGRATION_WINDOW_KEY: &str = "migration.window";
/// 默认稳定窗口
pub const DEFAULT_MIGRATION_WINDOW: Duration = Duration::from_millis(60_000);

/// 迁移判定器
pub trait MigrationComparator: Send + Sync {
    /// 给出两侧当前地址数，返回是否把流量切到新侧
    fn should_migrate(&self, previous: usize, current: usize) -> bool;
}

/// 默认判定器：新旧地址数比值达到阈值即切换
pub struct RatioComparator {
    threshold: f64,
}

impl RatioComparator {
    pub fn new(threshold: f64) -> Self {
        Self { threshold }
    }
}

impl MigrationComparator for RatioComparator {
    fn should_migrate(&self, previous: usize, current: usize) -> bool {
        if current == 0 {
            return false;
        }
        if previous == 0 {
            return true;
        }
        current as f64 / previous as f64 >= self.threshold
    }
}

struct Side {
    directory: Arc<dyn Directory>,
    invoker: InvokerRef,
}

/// 持有新旧两侧的迁移 Invoker
pub struct MigrationClusterInvoker {
    previous: Side,
    current: Side,
    comparator: Arc<dyn MigrationComparator>,
    window: Duration,
    promoted: AtomicBool,
    checked_at: Mutex<Option<Instant>>,
}

impl MigrationClusterInvoker {
    /// 阈值与窗口取自新侧消费方 URL（缺省用默认值）
    pub fn new(
        previous_directory: Arc<dyn Directory>,
        previous_invoker: InvokerRef,
        current_directory: Arc<dyn Directory>,
        current_invoker: InvokerRef,
    ) -> Self {
        let url = current_directory.url();
        let threshold = url
            .parameter(MIGRATION_THRESHOLD_KEY)
            .and_then(|v| v.parse::<f64>().ok())
            .unwrap_or(DEFAULT_MIGRATION_THRESHOLD);
        let window = Duration::from_millis(
            url.parameter_i64(
                MIGRATION_WINDOW_KEY,
                DEFAULT_MIGRATION_WINDOW.as_millis() as i64,
            )
            .max(0) as u64,
        );
        Self {
            previous: Side {
                directory: previous_directory,
                invoker: previous_invoker,
            },
            current: Side {
                directory: current_directory,
                invoker: current_invoker,
            },
            comparator: Arc::new(RatioComparator::new(threshold)),
            window,
            promoted: AtomicBool::new(false),
            checked_at: Mutex::new(None),
        }
    }

    pub fn with_comparator(mut self, comparator: Arc<dyn MigrationComparator>) -> Self {
        self.comparator = comparator;
        self
    }

    pub fn is_promoted(&self) -> bool {
        self.promoted.load(Ordering::SeqCst)
    }

    /// 当前应承接流量的一侧
    ///
    /// 已切换后不再回退；未切换时每个稳定窗口内至多判定一次。
    fn chosen(&self) -> &InvokerRef {
        if self.promoted.load(Ordering::SeqCst) {
            return &self.current.invoker;
        }
        let mut checked_at = self.checked_at.lock();
        let due = checked_at
            .map(|at| at.elapsed() >= self.window)
            .unwrap_or(true);
        if due {
            *checked_at = Some(Instant::now());
            let previous = self.previous.directory.size();
            let current = self.current.directory.size();
            if self.comparator.should_migrate(previous, current) {
                self.promoted.store(true, Ordering::SeqCst);
                info!(
                    service = %self.current.directory.service_key(),
                    previous_addresses = previous,
                    current_addresses = current,
                    "traffic migrated to the new registration model"
                );
                return &self.current.invoker;
            }
        }
        &self.previous.invoker
    }
}

#[async_trait]
impl Invoker for MigrationClusterInvoker {
    fn url(&self) -> &Url {
        self.current.directory.url()
    }

    fn is_available(&self) -> bool {
        self.previous.directory.is_available() || self.current.directory.is_available()
    }

    async fn invoke(&self, invocation: &Invocation) -> Result<RpcResult, RpcError> {
        self.chosen().invoke(invocation).await
    }

    fn destroy(&self) {
        self.previous.invoker.destroy();
        self.current.invoker.destroy();
        self.previous.directory.destroy();
        self.current.directory.destroy();
    }
}

/// 迁移集群
///
/// 作为扩展注册时只拿到单个目录，此时没有可迁移的对侧，
/// 退化为 failover 语义；双目录场景使用 `join_pair`。
pub struct MigrationCluster {
    scope: ExtensionScope,
}

impl MigrationCluster {
    pub fn new(scope: ExtensionScope) -> Self {
        Self { scope }
    }

    /// 合并新旧两套目录，两侧各自以 failover 语义兜底
    pub fn join_pair(
        &self,
        previous: Arc<dyn Directory>,
        current: Arc<dyn Directory>,
    ) -> Result<InvokerRef, RpcError> {
        let failover = FailoverCluster::new(self.scope.clone());
        let previous_invoker = failover.join(previous.clone())?;
        let current_invoker = failover.join(current.clone())?;
        Ok(Arc::new(MigrationClusterInvoker::new(
            previous,
            previous_invoker,
            current,
            current_invoker,
        )))
    }
}

impl Cluster for MigrationCluster {
    fn name(&self) -> &'static str {
        "migration"
    }

    fn join(&self, directory: Arc<dyn Directory>) -> Result<InvokerRef, RpcError> {
        FailoverCluster::new(self.scope.clone()).join(directory)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::StaticDirectory;
    use crate::invoker::tests_support::TestInvoker;

    #[test]
    fn test_ratio_comparator() {
        let cmp = RatioComparator::new(0.8);
        assert!(!cmp.should_migrate(10, 0));
        assert!(cmp.should_migrate(0, 1));
        assert!(cmp.should_migrate(10, 8));
        assert!(!cmp.should_migrate(10, 7));
    }

    fn directory_with(url: &str, count: usize) -> Arc<dyn Directory> {
        let invokers = (0..count)
            .map(|i| TestInvoker::ok(&format!("dubbo://host{i}:1/demo.Service")) as InvokerRef)
            .collect();
        Arc::new(StaticDirectory::new(Url::parse(url).unwrap(), invokers))
    }

    fn migration_over(previous: usize, current: usize, current_url: &str) -> (
        MigrationClusterInvoker,
        Arc<TestInvoker>,
        Arc<TestInvoker>,
    ) {
        let previous_invoker = TestInvoker::ok("dubbo://previous:1/demo.Service");
        let current_invoker = TestInvoker::ok("dubbo://current:1/demo.Service");
        let invoker = MigrationClusterInvoker::new(
            directory_with("consumer://0.0.0.0/demo.Service", previous),
            previous_invoker.clone() as InvokerRef,
            directory_with(current_url, current),
            current_invoker.clone() as InvokerRef,
        );
        (invoker, previous_invoker, current_invoker)
    }

    #[tokio::test]
    async fn test_serves_previous_side_below_threshold() {
        let (migration, previous, current) =
            migration_over(10, 1, "consumer://0.0.0.0/demo.Service");
        let inv = Invocation::new("demo.Service", "say");
        migration.invoke(&inv).await.unwrap();
        assert_eq!(previous.calls(), 1);
        assert_eq!(current.calls(), 0);
        assert!(!migration.is_promoted());
    }

    #[tokio::test]
    async fn test_promotes_when_ratio_reached() {
        let (migration, previous, current) =
            migration_over(10, 9, "consumer://0.0.0.0/demo.Service");
        let inv = Invocation::new("demo.Service", "say");
        migration.invoke(&inv).await.unwrap();
        migration.invoke(&inv).await.unwrap();
        assert_eq!(previous.calls(), 0);
        assert_eq!(current.calls(), 2);
        assert!(migration.is_promoted());
    }

    #[tokio::test]
    async fn test_window_suppresses_reevaluation() {
        // 大窗口：第一次判定未达标后，窗口内不再重新判定
        let (migration, previous, _current) = migration_over(
            10,
            1,
            "consumer://0.0.0.0/demo.Service?migration.window=60000",
        );
        let inv = Invocation::new("demo.Service", "say");
        for _ in 0..5 {
            migration.invoke(&inv).await.unwrap();
        }
        assert_eq!(previous.calls(), 5);
        assert!(!migration.is_promoted());
    }

    #[tokio::test]
    async fn test_custom_comparator_overrides_ratio() {
        struct Always;
        impl MigrationComparator for Always {
            fn should_migrate(&self, _: usize, _: usize) -> bool {
                true
            }
        }
        let (migration, _previous, current) =
            migration_over(10, 1, "consumer://0.0.0.0/demo.Service");
        let migration = migration.with_comparator(Arc::new(Always));
        let inv = Invocation::new("demo.Service", "say");
        migration.invoke(&inv).await.unwrap();
        assert_eq!(current.calls(), 1);
        assert!(migration.is_promoted());
    }
}
