/// 调用模型
///
/// `Invocation` 描述一次逻辑调用：方法名、参数、附件；
/// `RpcResult` 是被调方返回的结果，附件会随结果一起带回。

use std::collections::HashMap;

use serde_json::Value;

/// 一次远程调用的描述
#[derive(Debug, Clone)]
pub struct Invocation {
    /// 目标服务标识
    service: String,
    /// 方法名
    method: String,
    /// 参数值（协议无关的 JSON 表示）
    args: Vec<Value>,
    /// 附件，随请求透传到远端
    attachments: HashMap<String, String>,
}

impl Invocation {
    /// 创建新的调用
    pub fn new(service: impl Into<String>, method: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            method: method.into(),
            args: Vec::new(),
            attachments: HashMap::new(),
        }
    }

    /// 添加一个参数
    pub fn arg(mut self, value: impl Into<Value>) -> Self {
        self.args.push(value.into());
        self
    }

    /// 设置全部参数
    pub fn args(mut self, args: Vec<Value>) -> Self {
        self.args = args;
        self
    }

    /// 添加附件
    pub fn attachment(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attachments.insert(key.into(), value.into());
        self
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn arguments(&self) -> &[Value] {
        &self.args
    }

    pub fn attachments(&self) -> &HashMap<String, String> {
        &self.attachments
    }

    /// 获取附件值
    pub fn get_attachment(&self, key: &str) -> Option<&str> {
        self.attachments.get(key).map(|s| s.as_str())
    }
}

/// 调用结果
#[derive(Debug, Clone, Default)]
pub struct RpcResult {
    value: Option<Value>,
    attachments: HashMap<String, String>,
}

impl RpcResult {
    /// 创建带返回值的结果
    pub fn new(value: Value) -> Self {
        Self {
            value: Some(value),
            attachments: HashMap::new(),
        }
    }

    /// 空结果
    ///
    /// Failsafe / Failback 策略吞掉失败时返回的占位结果。
    pub fn empty() -> Self {
        Self::default()
    }

    /// 添加附件
    pub fn attachment(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attachments.insert(key.into(), value.into());
        self
    }

    pub fn value(&self) -> Option<&Value> {
        self.value.as_ref()
    }

    pub fn attachments(&self) -> &HashMap<String, String> {
        &self.attachments
    }

    pub fn is_empty(&self) -> bool {
        self.value.is_none()
    }
}
