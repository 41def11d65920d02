//! Typed tagged dispatch: `name -> {PayloadType, Invoker}`.
//!
//! Replaces a runtime keyed lookup of trait objects with a registry built at
//! startup. Each entry captures its own payload type and codec; the generic
//! consumer code only ever sees bytes in, bytes-or-failure out.

use std::collections::HashMap;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::codec::{JsonSerializer, Serializer};
use crate::job::{JobFailure, RequestContext};

#[async_trait::async_trait]
pub trait JobInvoker: Send + Sync {
    async fn invoke(&self, payload: &[u8], ctx: &RequestContext) -> Result<Vec<u8>, JobFailure>;
}

struct TypedInvoker<P, R, S, F, Fut> {
    handler: F,
    codec: S,
    _marker: PhantomData<fn(P) -> (R, Fut)>,
}

#[async_trait::async_trait]
impl<P, R, S, F, Fut> JobInvoker for TypedInvoker<P, R, S, F, Fut>
where
    P: DeserializeOwned + Send + Sync + 'static,
    R: Serialize + Send + Sync + 'static,
    S: Serializer + 'static,
    F: Fn(P, RequestContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<R, JobFailure>> + Send + 'static,
{
    async fn invoke(&self, payload: &[u8], ctx: &RequestContext) -> Result<Vec<u8>, JobFailure> {
        let typed: P = self.codec.deserialize(payload).map_err(|e| {
            JobFailure::new(e.code(), e.to_string())
        })?;
        let result = (self.handler)(typed, ctx.clone()).await?;
        self.codec
            .serialize(&result)
            .map_err(|e| JobFailure::new(e.code(), e.to_string()))
    }
}

/// Maps handler name to its invoker. Registered once at startup, read
/// concurrently by every consumer task thereafter.
#[derive(Default, Clone)]
pub struct HandlerRegistry {
    invokers: HashMap<String, Arc<dyn JobInvoker>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handler for `name` using the default JSON codec.
    pub fn register<P, R, F, Fut>(&mut self, name: impl Into<String>, handler: F)
    where
        P: DeserializeOwned + Send + Sync + 'static,
        R: Serialize + Send + Sync + 'static,
        F: Fn(P, RequestContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, JobFailure>> + Send + 'static,
    {
        self.register_with_codec(name, JsonSerializer, handler);
    }

    /// Registers a handler for `name` with an explicit, injectable codec.
    pub fn register_with_codec<P, R, S, F, Fut>(&mut self, name: impl Into<String>, codec: S, handler: F)
    where
        P: DeserializeOwned + Send + Sync + 'static,
        R: Serialize + Send + Sync + 'static,
        S: Serializer + 'static,
        F: Fn(P, RequestContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, JobFailure>> + Send + 'static,
    {
        let invoker = TypedInvoker {
            handler,
            codec,
            _marker: PhantomData,
        };
        self.invokers.insert(name.into(), Arc::new(invoker));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn JobInvoker>> {
        self.invokers.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.invokers.contains_key(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize)]
    struct EchoPayload {
        v: String,
    }

    #[derive(Debug, Serialize)]
    struct EchoResult {
        v: String,
    }

    #[tokio::test]
    async fn registered_handler_is_invoked_by_name() {
        let mut registry = HandlerRegistry::new();
        registry.register("Echo", |p: EchoPayload, _ctx| async move {
            Ok(EchoResult { v: p.v.to_uppercase() })
        });

        let invoker = registry.get("Echo").expect("handler registered");
        let out = invoker
            .invoke(br#"{"v":"hi"}"#, &RequestContext::default())
            .await
            .unwrap();
        let parsed: EchoResult = serde_json::from_slice(&out).unwrap();
        assert_eq!(parsed.v, "HI");
    }

    #[tokio::test]
    async fn unregistered_name_returns_none() {
        let registry = HandlerRegistry::new();
        assert!(registry.get("Missing").is_none());
        assert!(!registry.contains("Missing"));
    }

    #[tokio::test]
    async fn malformed_payload_surfaces_as_job_failure() {
        let mut registry = HandlerRegistry::new();
        registry.register("Echo", |p: EchoPayload, _ctx| async move { Ok(EchoResult { v: p.v }) });
        let invoker = registry.get("Echo").unwrap();
        let err = invoker.invoke(b"not json", &RequestContext::default()).await.unwrap_err();
        assert_eq!(err.code, "DESERIALIZATION_ERROR");
    }
}
