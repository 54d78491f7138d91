//! 函数注册表
//!
//! 所有可调用函数实现 FunctionDescriptor（name / description / input_schema / validate_args / execute），
//! 由 FunctionRegistry 按名注册与查找，FunctionSandbox 在调用时统一包装结果。

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::llm::FunctionSpec;

/// 函数描述 trait：名称、描述（供模型理解）、参数 schema、参数校验、异步执行（args 为 JSON）
#[async_trait]
pub trait FunctionDescriptor: Send + Sync {
    /// 函数名（单次调用内唯一）
    fn name(&self) -> &str;

    /// 函数描述（供模型理解功能）
    fn description(&self) -> &str;

    /// 参数 JSON Schema；默认空对象，表示无参数或参数格式不限
    fn input_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {},
            "required": []
        })
    }

    /// 校验并规整参数；默认原样通过
    fn validate_args(&self, args: Value) -> anyhow::Result<Value> {
        Ok(args)
    }

    /// 执行函数
    async fn execute(&self, args: Value) -> anyhow::Result<Value>;
}

/// 函数注册表：保持注册顺序，同名后注册者覆盖先注册者
#[derive(Default, Clone)]
pub struct FunctionRegistry {
    order: Vec<String>,
    functions: HashMap<String, Arc<dyn FunctionDescriptor>>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, function: impl FunctionDescriptor + 'static) {
        self.register_arc(Arc::new(function));
    }

    pub fn register_arc(&mut self, function: Arc<dyn FunctionDescriptor>) {
        let name = function.name().to_string();
        if self.functions.insert(name.clone(), function).is_some() {
            tracing::warn!(function = %name, "function registered twice, keeping the latest");
        } else {
            self.order.push(name);
        }
    }

    /// 链式注册
    pub fn with(mut self, function: impl FunctionDescriptor + 'static) -> Self {
        self.register(function);
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn FunctionDescriptor>> {
        self.functions.get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.order.clone()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// 按注册顺序生成函数声明，供请求携带
    pub fn specs(&self) -> Vec<FunctionSpec> {
        self.order
            .iter()
            .filter_map(|name| self.functions.get(name))
            .map(|f| FunctionSpec {
                name: f.name().to_string(),
                description: f.description().to_string(),
                parameters: f.input_schema(),
            })
            .collect()
    }
}

impl std::fmt::Debug for FunctionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FunctionRegistry")
            .field("functions", &self.order)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Named(&'static str, &'static str);

    #[async_trait]
    impl FunctionDescriptor for Named {
        fn name(&self) -> &str {
            self.0
        }

        fn description(&self) -> &str {
            self.1
        }

        async fn execute(&self, _args: Value) -> anyhow::Result<Value> {
            Ok(Value::String(self.1.to_string()))
        }
    }

    #[test]
    fn test_specs_follow_registration_order() {
        let registry = FunctionRegistry::new()
            .with(Named("b", "second"))
            .with(Named("a", "first"));
        let names: Vec<_> = registry.specs().into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["b", "a"]);
        assert_eq!(registry.specs()[0].parameters["type"], "object");
    }

    #[tokio::test]
    async fn test_duplicate_name_keeps_latest() {
        let registry = FunctionRegistry::new()
            .with(Named("a", "old"))
            .with(Named("a", "new"));
        assert_eq!(registry.len(), 1);
        let f = registry.get("a").unwrap();
        assert_eq!(f.execute(Value::Null).await.unwrap(), Value::String("new".into()));
        assert!(registry.get("missing").is_none());
    }
}
