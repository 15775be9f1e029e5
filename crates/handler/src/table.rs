use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::Value;

use crate::error::HandlerError;

/// A handler's return type: boxed so the table can hold handlers of differing concrete future
/// types behind one trait object, the way any dispatch table over `async fn` needs to.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// One entry in the method table: takes the request payload, returns the response payload or
/// a typed error that becomes an `error` envelope (§4.E).
pub trait Handler: Send + Sync {
    fn call(&self, payload: Value) -> BoxFuture<'static, Result<Value, HandlerError>>;
}

impl<F, Fut> Handler for F
where
    F: Fn(Value) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, HandlerError>> + Send + 'static,
{
    fn call(&self, payload: Value) -> BoxFuture<'static, Result<Value, HandlerError>> {
        Box::pin((self)(payload))
    }
}

/// The method table a child builds at startup and hands to [`crate::runtime::run`].
#[derive(Clone, Default)]
pub struct HandlerTable {
    handlers: HashMap<String, Arc<dyn Handler>>,
}

impl HandlerTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `method`, replacing any prior registration under the same name.
    pub fn register(&mut self, method: impl Into<String>, handler: impl Handler + 'static) {
        self.handlers.insert(method.into(), Arc::new(handler));
    }

    pub fn get(&self, method: &str) -> Option<Arc<dyn Handler>> {
        self.handlers.get(method).cloned()
    }

    pub fn methods(&self) -> impl Iterator<Item = &str> {
        self.handlers.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn registers_and_calls_a_handler() {
        let mut table = HandlerTable::new();
        table.register("echo", |payload: Value| async move { Ok(payload) });

        let handler = table.get("echo").expect("handler registered");
        let result = handler.call(json!({"a": 1})).await.unwrap();
        assert_eq!(result, json!({"a": 1}));
    }

    #[tokio::test]
    async fn unregistered_method_is_absent() {
        let table = HandlerTable::new();
        assert!(table.get("missing").is_none());
    }

    #[tokio::test]
    async fn a_failing_handler_surfaces_its_error() {
        let mut table = HandlerTable::new();
        table.register("boom", |_payload: Value| async move {
            Err(HandlerError::Validation("bad input".into()))
        });

        let handler = table.get("boom").unwrap();
        let err = handler.call(json!(null)).await.unwrap_err();
        assert!(matches!(err, HandlerError::Validation(_)));
    }
}
