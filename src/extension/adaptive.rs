/// 自适应分发
///
/// 原始实现为每个接口生成 `$Adaptive` 代理类；这里用一个泛型句柄代替：
/// 按接口声明的参数键顺序探测 URL，取到扩展名后委托给作用域解析。

use std::marker::PhantomData;
use std::sync::Arc;

use crate::{error::RpcError, url::Url};

use super::ExtensionScope;

/// 某接口的自适应分发句柄
///
/// 句柄本身不持有任何实例，`resolve` 每次根据 URL 参数决定目标扩展名，
/// 解析出的实例由作用域缓存。句柄可以在扩展表注册之前创建（惰性绑定），
/// 这正是打破循环自适应依赖的手段。
pub struct AdaptiveExtension<T: ?Sized + Send + Sync + 'static> {
    scope: ExtensionScope,
    _marker: PhantomData<fn() -> Arc<T>>,
}

impl<T: ?Sized + Send + Sync + 'static> Clone for AdaptiveExtension<T> {
    fn clone(&self) -> Self {
        Self {
            scope: self.scope.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T: ?Sized + Send + Sync + 'static> AdaptiveExtension<T> {
    pub(crate) fn new(scope: ExtensionScope) -> Self {
        Self {
            scope,
            _marker: PhantomData,
        }
    }

    /// 根据 URL 解析扩展实例
    ///
    /// 按接口声明的键列表顺序探测，第一个非空参数即为扩展名；
    /// 全部缺省时回落到接口的默认实现名。
    pub fn resolve(&self, url: &Url) -> Result<Arc<T>, RpcError> {
        self.resolve_name(url, None)
    }

    /// 按方法级覆盖解析扩展实例
    ///
    /// 探测键先查 `method.key` 再查 `key`。
    pub fn resolve_for_method(&self, url: &Url, method: &str) -> Result<Arc<T>, RpcError> {
        self.resolve_name(url, Some(method))
    }

    fn resolve_name(&self, url: &Url, method: Option<&str>) -> Result<Arc<T>, RpcError> {
        let table = self.scope.table::<T>()?;
        if table.adaptive_keys().is_empty() {
            return Err(RpcError::illegal_argument(format!(
                "interface '{}' declares no adaptive keys",
                table.interface()
            )));
        }

        let mut name: Option<&str> = None;
        for key in table.adaptive_keys() {
            let value = match method {
                Some(m) => url.method_parameter(m, key),
                None => url.parameter(key),
            };
            if let Some(v) = value {
                if !v.is_empty() {
                    name = Some(v);
                    break;
                }
            }
        }

        let name = match name {
            Some(n) => n.to_string(),
            None => table
                .default_name()
                .map(str::to_string)
                .ok_or_else(|| {
                    RpcError::illegal_state(format!(
                        "failed to resolve extension name of interface '{}' from url '{}' (keys: {:?}) and no default is declared",
                        table.interface(),
                        url,
                        table.adaptive_keys(),
                    ))
                })?,
        };

        // 解析出的名字没有对应注册时按状态错误上报
        self.scope.get::<T>(&name).map_err(|e| match e {
            RpcError::ExtensionNotFound { interface, name } => RpcError::illegal_state(format!(
                "adaptive extension of interface '{}' resolved to unregistered name '{}'",
                interface, name
            )),
            other => other,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extension::ExtensionTable;

    trait ThreadPool: Send + Sync {
        fn pool_name(&self) -> &'static str;
    }

    struct FixedThreadPool;
    impl ThreadPool for FixedThreadPool {
        fn pool_name(&self) -> &'static str {
            "fixed"
        }
    }

    struct CachedThreadPool;
    impl ThreadPool for CachedThreadPool {
        fn pool_name(&self) -> &'static str {
            "cached"
        }
    }

    fn pool_scope(default: Option<&'static str>) -> ExtensionScope {
        let scope = ExtensionScope::new();
        let mut builder = ExtensionTable::<dyn ThreadPool>::builder("ThreadPool")
            .adaptive_keys(["threadpool"])
            .extension("fixed", |_| Ok(Arc::new(FixedThreadPool)))
            .extension("cached", |_| Ok(Arc::new(CachedThreadPool)));
        if let Some(name) = default {
            builder = builder.default_name(name);
        }
        scope.register::<dyn ThreadPool>(builder.build()).unwrap();
        scope
    }

    #[test]
    fn test_adaptive_resolves_from_url_parameter() {
        let scope = pool_scope(Some("cached"));
        let adaptive = scope.adaptive::<dyn ThreadPool>();
        let url = Url::parse("thread://x?threadpool=fixed").unwrap();
        assert_eq!(adaptive.resolve(&url).unwrap().pool_name(), "fixed");
    }

    #[test]
    fn test_adaptive_falls_back_to_default() {
        let scope = pool_scope(Some("cached"));
        let adaptive = scope.adaptive::<dyn ThreadPool>();
        let url = Url::parse("thread://x").unwrap();
        assert_eq!(adaptive.resolve(&url).unwrap().pool_name(), "cached");
        // 空值参数同样回落到默认
        let url = Url::parse("thread://x?threadpool=").unwrap();
        assert_eq!(adaptive.resolve(&url).unwrap().pool_name(), "cached");
    }

    #[test]
    fn test_adaptive_without_default_is_illegal_state() {
        let scope = pool_scope(None);
        let adaptive = scope.adaptive::<dyn ThreadPool>();
        let url = Url::parse("thread://x").unwrap();
        assert!(matches!(
            adaptive.resolve(&url),
            Err(RpcError::IllegalState { .. })
        ));
    }

    #[test]
    fn test_adaptive_unresolvable_name_is_illegal_state() {
        let scope = pool_scope(Some("fixed"));
        let adaptive = scope.adaptive::<dyn ThreadPool>();
        let url = Url::parse("thread://x?threadpool=forkjoin").unwrap();
        let err = adaptive.resolve(&url).err().unwrap();
        assert!(matches!(err, RpcError::IllegalState { .. }));
        assert!(err.to_string().contains("forkjoin"));
    }

    #[test]
    fn test_adaptive_without_keys_is_illegal_argument() {
        trait Bare: Send + Sync {}
        struct BareImpl;
        impl Bare for BareImpl {}

        let scope = ExtensionScope::new();
        scope
            .register::<dyn Bare>(
                ExtensionTable::builder("Bare")
                    .extension("only", |_| Ok(Arc::new(BareImpl) as Arc<dyn Bare>))
                    .build(),
            )
            .unwrap();
        let url = Url::parse("x://h:1").unwrap();
        assert!(matches!(
            scope.adaptive::<dyn Bare>().resolve(&url),
            Err(RpcError::IllegalArgument { .. })
        ));
    }

    #[test]
    fn test_adaptive_honors_method_override() {
        let scope = pool_scope(Some("fixed"));
        let adaptive = scope.adaptive::<dyn ThreadPool>();
        let url = Url::parse("thread://x?threadpool=fixed&query.threadpool=cached").unwrap();
        assert_eq!(adaptive.resolve_for_method(&url, "query").unwrap().pool_name(), "cached");
        assert_eq!(adaptive.resolve_for_method(&url, "insert").unwrap().pool_name(), "fixed");
    }
}
