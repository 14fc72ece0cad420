/// 扩展加载子系统
///
/// 每个能力接口（trait 对象）对应一张扩展表：按名字注册的工厂、
/// 默认实现名、自适应探测键、激活元数据和包装器链。
/// `ExtensionScope` 是显式的作用域对象，不使用任何全局静态状态，
/// 一个进程内可以同时存在多个互相隔离的作用域。

pub mod activate;
pub mod adaptive;

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::RwLock;

use crate::error::RpcError;

pub use activate::ActivateMeta;
pub use adaptive::AdaptiveExtension;

/// 扩展工厂：由作用域驱动构造一个实例
///
/// 工厂持有 `&ExtensionScope`，依赖其他接口的扩展时应捕获
/// `scope.adaptive::<dyn Other>()` 延迟解析，避免循环依赖下的无限递归。
pub type ExtensionFactory<T> =
    Arc<dyn Fn(&ExtensionScope) -> Result<Arc<T>, RpcError> + Send + Sync>;

/// 包装器工厂：接收已包装好的内层实例，返回再包一层的实例
pub type WrapperFactory<T> =
    Arc<dyn Fn(Arc<T>, &ExtensionScope) -> Result<Arc<T>, RpcError> + Send + Sync>;

struct ExtensionEntry<T: ?Sized> {
    name: String,
    factory: ExtensionFactory<T>,
    activate: Option<ActivateMeta>,
}

/// 一个能力接口的扩展表
pub struct ExtensionTable<T: ?Sized + Send + Sync + 'static> {
    interface: &'static str,
    default_name: Option<String>,
    adaptive_keys: Vec<String>,
    entries: Vec<ExtensionEntry<T>>,
    wrappers: Vec<WrapperFactory<T>>,
    /// (name -> 实例) 单例缓存；构造失败不会写入，下次访问重新构造
    instances: DashMap<String, Arc<T>>,
}

impl<T: ?Sized + Send + Sync + 'static> ExtensionTable<T> {
    /// 创建扩展表构建器
    pub fn builder(interface: &'static str) -> ExtensionTableBuilder<T> {
        ExtensionTableBuilder {
            interface,
            default_name: None,
            adaptive_keys: Vec::new(),
            entries: Vec::new(),
            wrappers: Vec::new(),
        }
    }

    /// 接口名
    pub fn interface(&self) -> &'static str {
        self.interface
    }

    /// 默认实现名
    pub fn default_name(&self) -> Option<&str> {
        self.default_name.as_deref()
    }

    /// 自适应探测键列表
    pub fn adaptive_keys(&self) -> &[String] {
        &self.adaptive_keys
    }

    /// 已注册的扩展名（声明顺序）
    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.name.as_str()).collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|e| e.name == name)
    }

    fn entry(&self, name: &str) -> Option<&ExtensionEntry<T>> {
        self.entries.iter().find(|e| e.name == name)
    }

    /// 获取（或构造）指定名称的单例实例
    ///
    /// 并发首次访问通过 DashMap 的 entry 锁保证只构造一次。
    fn get(&self, name: &str, scope: &ExtensionScope) -> Result<Arc<T>, RpcError> {
        if let Some(instance) = self.instances.get(name) {
            return Ok(instance.clone());
        }
        let entry = self
            .entry(name)
            .ok_or_else(|| RpcError::extension_not_found(self.interface, name))?;

        match self.instances.entry(name.to_string()) {
            Entry::Occupied(occupied) => Ok(occupied.get().clone()),
            Entry::Vacant(vacant) => {
                let instance = self.construct(entry, scope)?;
                vacant.insert(instance.clone());
                Ok(instance)
            }
        }
    }

    /// 构造并套上包装器链
    ///
    /// 包装器按声明顺序应用，先声明的在最内层。
    fn construct(&self, entry: &ExtensionEntry<T>, scope: &ExtensionScope) -> Result<Arc<T>, RpcError> {
        let wrap_err = |e: RpcError| RpcError::extension_init(self.interface, &entry.name, e.to_string());

        let mut instance = (entry.factory)(scope).map_err(wrap_err)?;
        for wrapper in &self.wrappers {
            instance = wrapper(instance, scope).map_err(wrap_err)?;
        }
        Ok(instance)
    }
}

/// 扩展表构建器
pub struct ExtensionTableBuilder<T: ?Sized + Send + Sync + 'static> {
    interface: &'static str,
    default_name: Option<String>,
    adaptive_keys: Vec<String>,
    entries: Vec<ExtensionEntry<T>>,
    wrappers: Vec<WrapperFactory<T>>,
}

impl<T: ?Sized + Send + Sync + 'static> ExtensionTableBuilder<T> {
    /// 设置默认实现名
    pub fn default_name(mut self, name: impl Into<String>) -> Self {
        self.default_name = Some(name.into());
        self
    }

    /// 设置自适应分发时探测的 URL 参数键（按顺序探测）
    pub fn adaptive_keys<S: Into<String>>(mut self, keys: impl IntoIterator<Item = S>) -> Self {
        self.adaptive_keys = keys.into_iter().map(Into::into).collect();
        self
    }

    /// 注册一个命名扩展
    pub fn extension<F>(mut self, name: impl Into<String>, factory: F) -> Self
    where
        F: Fn(&ExtensionScope) -> Result<Arc<T>, RpcError> + Send + Sync + 'static,
    {
        self.entries.push(ExtensionEntry {
            name: name.into(),
            factory: Arc::new(factory),
            activate: None,
        });
        self
    }

    /// 注册一个可自动激活的扩展
    pub fn activate_extension<F>(
        mut self,
        name: impl Into<String>,
        activate: ActivateMeta,
        factory: F,
    ) -> Self
    where
        F: Fn(&ExtensionScope) -> Result<Arc<T>, RpcError> + Send + Sync + 'static,
    {
        self.entries.push(ExtensionEntry {
            name: name.into(),
            factory: Arc::new(factory),
            activate: Some(activate),
        });
        self
    }

    /// 注册一个包装器（装饰同接口的实例）
    pub fn wrapper<F>(mut self, factory: F) -> Self
    where
        F: Fn(Arc<T>, &ExtensionScope) -> Result<Arc<T>, RpcError> + Send + Sync + 'static,
    {
        self.wrappers.push(Arc::new(factory));
        self
    }

    pub fn build(self) -> ExtensionTable<T> {
        ExtensionTable {
            interface: self.interface,
            default_name: self.default_name,
            adaptive_keys: self.adaptive_keys,
            entries: self.entries,
            wrappers: self.wrappers,
            instances: DashMap::new(),
        }
    }
}

struct ScopeInner {
    /// TypeId(接口) -> ExtensionTable<T>
    tables: RwLock<HashMap<TypeId, Arc<dyn Any + Send + Sync>>>,
    destroyed: AtomicBool,
}

/// 扩展作用域
///
/// 克隆是浅拷贝（共享内部状态）。销毁后所有操作返回 `IllegalState`。
#[derive(Clone)]
pub struct ExtensionScope {
    inner: Arc<ScopeInner>,
}

impl ExtensionScope {
    /// 创建空的作用域
    pub fn new() -> Self {
        Self {
            inner: Arc::new(ScopeInner {
                tables: RwLock::new(HashMap::new()),
                destroyed: AtomicBool::new(false),
            }),
        }
    }

    fn check_alive(&self) -> Result<(), RpcError> {
        if self.inner.destroyed.load(Ordering::SeqCst) {
            return Err(RpcError::illegal_state("extension scope is already destroyed"));
        }
        Ok(())
    }

    /// 注册一个接口的扩展表
    ///
    /// 每个接口只能注册一次，重复注册返回错误。
    pub fn register<T>(&self, table: ExtensionTable<T>) -> Result<(), RpcError>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.check_alive()?;
        let mut tables = self.inner.tables.write();
        let type_id = TypeId::of::<T>();
        if tables.contains_key(&type_id) {
            return Err(RpcError::illegal_state(format!(
                "extension table for interface '{}' is already registered",
                table.interface
            )));
        }
        tables.insert(type_id, Arc::new(table));
        Ok(())
    }

    /// 取出接口对应的扩展表（持锁时间只覆盖查表，不覆盖构造）
    pub(crate) fn table<T>(&self) -> Result<Arc<ExtensionTable<T>>, RpcError>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.check_alive()?;
        let table = {
            let tables = self.inner.tables.read();
            tables.get(&TypeId::of::<T>()).cloned()
        };
        let table = table.ok_or_else(|| {
            RpcError::illegal_state(format!(
                "no extension table registered for interface type '{}'",
                std::any::type_name::<T>()
            ))
        })?;
        table
            .downcast::<ExtensionTable<T>>()
            .map_err(|_| RpcError::illegal_state("extension table type mismatch"))
    }

    /// 获取指定名称的扩展实例（单例，带包装器链）
    pub fn get<T>(&self, name: &str) -> Result<Arc<T>, RpcError>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        let table = self.table::<T>()?;
        table.get(name, self)
    }

    /// 获取接口的默认扩展实例
    pub fn get_default<T>(&self) -> Result<Arc<T>, RpcError>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        let table = self.table::<T>()?;
        let name = table.default_name().ok_or_else(|| {
            RpcError::illegal_state(format!(
                "interface '{}' declares no default extension",
                table.interface()
            ))
        })?;
        table.get(&name.to_string(), self)
    }

    /// 获取接口的自适应分发句柄
    ///
    /// 句柄是惰性的：此处不做任何解析，循环依赖在这里被打破。
    pub fn adaptive<T>(&self) -> AdaptiveExtension<T>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        AdaptiveExtension::new(self.clone())
    }

    /// 销毁作用域：清空所有表和缓存实例
    pub fn destroy(&self) {
        if self.inner.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.inner.tables.write().clear();
    }
}

impl Default for ExtensionScope {
    fn default() -> Self {
        Self::new()
    }
}
