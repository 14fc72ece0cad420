/// 负载均衡
///
/// 从路由后的候选列表中为一次调用挑选恰好一个 Invoker。
/// 公共约定：空列表是调用方错误；单元素列表 O(1) 直接返回；
/// 只要存在可用的 Invoker 就绝不选中不可用的。
/// 权重取自提供方 URL 参数 `weight`（支持方法级覆盖），默认 100。

use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeMap, HashMap};
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use rand::Rng;

use crate::{
    error::RpcError,
    invocation::Invocation,
    invoker::InvokerRef,
    url::Url,
};

/// 自适应分发探测的 URL 参数
pub const LOADBALANCE_KEY: &str = "loadbalance";
/// 权重参数
pub const WEIGHT_KEY: &str = "weight";
/// 默认权重
pub const DEFAULT_WEIGHT: i64 = 100;
/// 一致性哈希的虚拟节点数
const VIRTUAL_NODES: u64 = 160;

/// 负载均衡算法
pub trait LoadBalance: Send + Sync {
    fn name(&self) -> &'static str;

    /// 从非空候选列表中选出一个 Invoker
    fn select(
        &self,
        invokers: &[InvokerRef],
        url: &Url,
        invocation: &Invocation,
    ) -> Result<InvokerRef, RpcError>;
}

fn weight_of(invoker: &InvokerRef, invocation: &Invocation) -> i64 {
    invoker
        .url()
        .method_parameter_i64(invocation.method(), WEIGHT_KEY, DEFAULT_WEIGHT)
        .max(0)
}

/// 公共预选：空列表报错、单元素短路、可用者优先
///
/// 返回 `Err(整列表错误)`、`Ok(Ok(唯一候选))` 或 `Ok(Err(候选列表))`。
fn preselect(invokers: &[InvokerRef]) -> Result<Result<InvokerRef, Vec<InvokerRef>>, RpcError> {
    match invokers {
        [] => Err(RpcError::illegal_argument(
            "load balance received an empty invoker list",
        )),
        [only] => Ok(Ok(only.clone())),
        _ => {
            let available: Vec<InvokerRef> = invokers
                .iter()
                .filter(|i| i.is_available())
                .cloned()
                .collect();
            let candidates = if available.is_empty() {
                invokers.to_vec()
            } else {
                available
            };
            match candidates.as_slice() {
                [only] => Ok(Ok(only.clone())),
                _ => Ok(Err(candidates)),
            }
        }
    }
}

/// 加权随机
pub struct RandomLoadBalance;

impl LoadBalance for RandomLoadBalance {
    fn name(&self) -> &'static str {
        "random"
    }

    fn select(
        &self,
        invokers: &[InvokerRef],
        _url: &Url,
        invocation: &Invocation,
    ) -> Result<InvokerRef, RpcError> {
        let candidates = match preselect(invokers)? {
            Ok(only) => return Ok(only),
            Err(candidates) => candidates,
        };

        let weights: Vec<i64> = candidates.iter().map(|i| weight_of(i, invocation)).collect();
        let total: i64 = weights.iter().sum();
        let mut rng = rand::thread_rng();

        let uniform = total <= 0 || weights.iter().all(|w| *w == weights[0]);
        if uniform {
            let index = rng.gen_range(0..candidates.len());
            return Ok(candidates[index].clone());
        }

        let mut offset = rng.gen_range(0..total);
        for (invoker, weight) in candidates.iter().zip(&weights) {
            offset -= weight;
            if offset < 0 {
                return Ok(invoker.clone());
            }
        }
        Ok(candidates[candidates.len() - 1].clone())
    }
}

#[derive(Default)]
struct RoundRobinState {
    current: i64,
}

/// 平滑加权轮询
///
/// 每个 (服务, 方法) 维护一份按端点的当前权重表：每轮给所有端点
/// 加上自身权重，选中当前权重最大者并减去总权重。
pub struct RoundRobinLoadBalance {
    counters: DashMap<String, Arc<Mutex<HashMap<String, RoundRobinState>>>>,
}

impl RoundRobinLoadBalance {
    pub fn new() -> Self {
        Self {
            counters: DashMap::new(),
        }
    }
}

impl Default for RoundRobinLoadBalance {
    fn default() -> Self {
        Self::new()
    }
}

impl LoadBalance for RoundRobinLoadBalance {
    fn name(&self) -> &'static str {
        "roundrobin"
    }

    fn select(
        &self,
        invokers: &[InvokerRef],
        _url: &Url,
        invocation: &Invocation,
    ) -> Result<InvokerRef, RpcError> {
        let candidates = match preselect(invokers)? {
            Ok(only) => return Ok(only),
            Err(candidates) => candidates,
        };

        let key = format!("{}#{}", invocation.service(), invocation.method());
        let states = self
            .counters
            .entry(key)
            .or_insert_with(|| Arc::new(Mutex::new(HashMap::new())))
            .clone();
        let mut states = states.lock();

        let endpoints: Vec<String> = candidates.iter().map(|i| i.url().to_string()).collect();
        let mut total = 0i64;
        let mut best_index = 0usize;
        let mut best_current = i64::MIN;
        for (index, invoker) in candidates.iter().enumerate() {
            let weight = weight_of(invoker, invocation);
            total += weight;
            let state = states.entry(endpoints[index].clone()).or_default();
            state.current += weight;
            if state.current > best_current {
                best_index = index;
                best_current = state.current;
            }
        }
        // 已离开候选集的端点连同计数一起回收
        states.retain(|endpoint, _| endpoints.iter().any(|e| e == endpoint));

        let selected = candidates[best_index].clone();
        if let Some(state) = states.get_mut(&endpoints[best_index]) {
            state.current -= total;
        }
        Ok(selected)
    }
}

struct HashRing {
    /// 候选列表的代算指纹，列表变化时重建
    identity: u64,
    ring: BTreeMap<u64, InvokerRef>,
}

/// 一致性哈希
///
/// 按参数值哈希到虚拟节点环，同样的参数总是落在同一端点；
/// 参与哈希的参数下标由 URL 参数 `hash.arguments` 指定（默认第 0 个）。
/// 环只基于通过预选的候选构建，候选集变化时按指纹重建。
pub struct ConsistentHashLoadBalance {
    selectors: DashMap<String, Arc<HashRing>>,
}

impl ConsistentHashLoadBalance {
    pub fn new() -> Self {
        Self {
            selectors: DashMap::new(),
        }
    }

    fn hash_of(value: &str) -> u64 {
        let mut hasher = DefaultHasher::new();
        value.hash(&mut hasher);
        hasher.finish()
    }

    fn identity_of(invokers: &[InvokerRef]) -> u64 {
        let mut hasher = DefaultHasher::new();
        for invoker in invokers {
            invoker.url().to_string().hash(&mut hasher);
        }
        hasher.finish()
    }

    fn build_ring(invokers: &[InvokerRef]) -> BTreeMap<u64, InvokerRef> {
        let mut ring = BTreeMap::new();
        for invoker in invokers {
            let base = invoker.url().to_string();
            for node in 0..VIRTUAL_NODES {
                ring.insert(Self::hash_of(&format!("{}#{}", base, node)), invoker.clone());
            }
        }
        ring
    }

    fn hash_key(url: &Url, invocation: &Invocation) -> String {
        let indexes = url.parameter_or("hash.arguments", "0");
        let mut key = String::new();
        for raw in indexes.split(',') {
            if let Ok(index) = raw.trim().parse::<usize>() {
                if let Some(value) = invocation.arguments().get(index) {
                    key.push_str(&value.to_string());
                }
            }
        }
        key
    }
}

impl Default for ConsistentHashLoadBalance {
    fn default() -> Self {
        Self::new()
    }
}

impl LoadBalance for ConsistentHashLoadBalance {
    fn name(&self) -> &'static str {
        "consistenthash"
    }

    fn select(
        &self,
        invokers: &[InvokerRef],
        url: &Url,
        invocation: &Invocation,
    ) -> Result<InvokerRef, RpcError> {
        let candidates = match preselect(invokers)? {
            Ok(only) => return Ok(only),
            Err(candidates) => candidates,
        };

        let key = format!("{}#{}", invocation.service(), invocation.method());
        let identity = Self::identity_of(&candidates);
        let ring = {
            let current = self.selectors.get(&key).map(|r| r.clone());
            match current {
                Some(ring) if ring.identity == identity => ring,
                _ => {
                    let rebuilt = Arc::new(HashRing {
                        identity,
                        ring: Self::build_ring(&candidates),
                    });
                    self.selectors.insert(key, rebuilt.clone());
                    rebuilt
                }
            }
        };

        let hash = Self::hash_of(&Self::hash_key(url, invocation));
        ring.ring
            .range(hash..)
            .next()
            .or_else(|| ring.ring.iter().next())
            .map(|(_, invoker)| invoker.clone())
            .ok_or_else(|| RpcError::illegal_state("consistent hash ring is empty"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::invoker::tests_support::{new_test_invoker, TestInvoker};

    fn url() -> Url {
        Url::parse("consumer://0.0.0.0/demo.Service").unwrap()
    }

    fn invocation() -> Invocation {
        Invocation::new("demo.Service", "say")
    }

    fn pool() -> Vec<InvokerRef> {
        vec![
            new_test_invoker("dubbo://a:1/demo.Service"),
            new_test_invoker("dubbo://b:1/demo.Service"),
            new_test_invoker("dubbo://c:1/demo.Service"),
        ]
    }

    fn all_algorithms() -> Vec<Box<dyn LoadBalance>> {
        vec![
            Box::new(RandomLoadBalance),
            Box::new(RoundRobinLoadBalance::new()),
            Box::new(ConsistentHashLoadBalance::new()),
        ]
    }

    #[test]
    fn test_empty_list_is_illegal_argument() {
        for lb in all_algorithms() {
            assert!(matches!(
                lb.select(&[], &url(), &invocation()),
                Err(RpcError::IllegalArgument { .. })
            ));
        }
    }

    #[test]
    fn test_singleton_list_returns_that_invoker() {
        let single = vec![new_test_invoker("dubbo://only:1/demo.Service")];
        for lb in all_algorithms() {
            let selected = lb.select(&single, &url(), &invocation()).unwrap();
            assert!(Arc::ptr_eq(&selected, &single[0]));
        }
    }

    #[test]
    fn test_never_selects_unavailable_when_available_exists() {
        let down = TestInvoker::ok("dubbo://down:1/demo.Service");
        down.set_available(false);
        let up = new_test_invoker("dubbo://up:1/demo.Service");
        let pair: Vec<InvokerRef> = vec![down.clone() as InvokerRef, up.clone()];
        // 两个以上可用端点时一致性哈希走环路径而非单候选短路
        let up2 = new_test_invoker("dubbo://up2:1/demo.Service");
        let trio: Vec<InvokerRef> = vec![down as InvokerRef, up.clone(), up2];

        for lb in all_algorithms() {
            for i in 0..20 {
                // 变换哈希参数，覆盖环上的不同落点
                let inv = Invocation::new("demo.Service", "say").arg(format!("user-{}", i));
                let selected = lb.select(&pair, &url(), &inv).unwrap();
                assert!(Arc::ptr_eq(&selected, &up));
                let selected = lb.select(&trio, &url(), &inv).unwrap();
                assert!(selected.is_available());
            }
        }
    }

    #[test]
    fn test_weighted_random_respects_zero_weight() {
        let heavy = new_test_invoker("dubbo://heavy:1/demo.Service?weight=100");
        let zero = new_test_invoker("dubbo://zero:1/demo.Service?weight=0");
        let invokers = vec![heavy.clone(), zero];
        let lb = RandomLoadBalance;
        for _ in 0..50 {
            let selected = lb.select(&invokers, &url(), &invocation()).unwrap();
            assert!(Arc::ptr_eq(&selected, &heavy));
        }
    }

    #[test]
    fn test_smooth_weighted_round_robin_distribution() {
        let a = new_test_invoker("dubbo://a:1/demo.Service?weight=1");
        let b = new_test_invoker("dubbo://b:1/demo.Service?weight=2");
        let invokers = vec![a.clone(), b.clone()];
        let lb = RoundRobinLoadBalance::new();

        let mut counts = (0usize, 0usize);
        for _ in 0..30 {
            let selected = lb.select(&invokers, &url(), &invocation()).unwrap();
            if Arc::ptr_eq(&selected, &a) {
                counts.0 += 1;
            } else {
                counts.1 += 1;
            }
        }
        assert_eq!(counts, (10, 20));
    }

    #[test]
    fn test_round_robin_recycles_departed_endpoints() {
        let a = new_test_invoker("dubbo://a:1/demo.Service");
        let b = new_test_invoker("dubbo://b:1/demo.Service");
        let c = new_test_invoker("dubbo://c:1/demo.Service");
        let lb = RoundRobinLoadBalance::new();

        lb.select(&[a.clone(), b.clone()], &url(), &invocation()).unwrap();
        lb.select(&[b.clone(), c.clone()], &url(), &invocation()).unwrap();

        let key = format!("{}#{}", invocation().service(), invocation().method());
        let states = lb.counters.get(&key).map(|s| s.value().clone()).unwrap();
        let states = states.lock();
        assert!(!states.contains_key(&a.url().to_string()));
        assert!(states.contains_key(&b.url().to_string()));
        assert!(states.contains_key(&c.url().to_string()));
    }

    #[test]
    fn test_consistent_hash_is_sticky() {
        let invokers = pool();
        let lb = ConsistentHashLoadBalance::new();
        let inv = Invocation::new("demo.Service", "say").arg("user-42");

        let first = lb.select(&invokers, &url(), &inv).unwrap();
        for _ in 0..10 {
            let again = lb.select(&invokers, &url(), &inv).unwrap();
            assert!(Arc::ptr_eq(&first, &again));
        }
    }

    #[test]
    fn test_consistent_hash_rebuilds_on_membership_change() {
        let mut invokers = pool();
        let lb = ConsistentHashLoadBalance::new();
        let inv = Invocation::new("demo.Service", "say").arg("user-42");

        let first = lb.select(&invokers, &url(), &inv).unwrap();
        // 移除一个端点后仍然可选，且同 key 保持稳定
        invokers.retain(|i| !Arc::ptr_eq(i, &first));
        let second = lb.select(&invokers, &url(), &inv).unwrap();
        let third = lb.select(&invokers, &url(), &inv).unwrap();
        assert!(Arc::ptr_eq(&second, &third));
    }
}
