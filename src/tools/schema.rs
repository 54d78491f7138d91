//! 类型化函数：参数 Schema 由 schemars 自动生成，校验即反序列化为参数类型
//!
//! 减少手写 JSON Schema 与实际参数结构不一致导致的模型调用格式错误。

use std::future::Future;
use std::marker::PhantomData;

use async_trait::async_trait;
use schemars::gen::SchemaSettings;
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::tools::FunctionDescriptor;

/// 生成参数类型的 JSON Schema（内联子 schema，去掉 `$schema` 元字段）
pub fn input_schema_for<A: JsonSchema>() -> Value {
    let settings = SchemaSettings::draft07().with(|s| {
        s.inline_subschemas = true;
    });
    let root = settings.into_generator().into_root_schema_for::<A>();
    let mut schema = serde_json::to_value(root).unwrap_or_else(|_| serde_json::json!({"type": "object"}));
    if let Value::Object(map) = &mut schema {
        map.remove("$schema");
    }
    schema
}

/// 由闭包与参数类型构成的函数描述
pub struct TypedFunction<A, R, F> {
    name: String,
    description: String,
    schema: Value,
    handler: F,
    _marker: PhantomData<fn(A) -> R>,
}

impl<A, R, F, Fut> TypedFunction<A, R, F>
where
    A: DeserializeOwned + JsonSchema + Send + 'static,
    R: Serialize + Send + 'static,
    F: Fn(A) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<R>> + Send + 'static,
{
    pub fn new(name: impl Into<String>, description: impl Into<String>, handler: F) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            schema: input_schema_for::<A>(),
            handler,
            _marker: PhantomData,
        }
    }
}

#[async_trait]
impl<A, R, F, Fut> FunctionDescriptor for TypedFunction<A, R, F>
where
    A: DeserializeOwned + JsonSchema + Send + 'static,
    R: Serialize + Send + 'static,
    F: Fn(A) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<R>> + Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn input_schema(&self) -> Value {
        self.schema.clone()
    }

    fn validate_args(&self, args: Value) -> anyhow::Result<Value> {
        serde_json::from_value::<A>(args.clone())?;
        Ok(args)
    }

    async fn execute(&self, args: Value) -> anyhow::Result<Value> {
        let parsed: A = serde_json::from_value(args)?;
        let output = (self.handler)(parsed).await?;
        Ok(serde_json::to_value(output)?)
    }
}
