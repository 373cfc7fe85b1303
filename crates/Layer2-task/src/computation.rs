//! Computations - named async work that can run inside a worker process
//!
//! A closure cannot cross a process boundary, so work is identified by a
//! stable name. The parent sends the name and a JSON payload; the worker
//! looks the name up in its own [`ComputationRegistry`].

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Async work runnable inside a worker process
#[async_trait]
pub trait Computation: Send + Sync + 'static {
    /// Name the worker registry knows this computation by
    const NAME: &'static str;

    /// Payload sent from the parent
    type Input: Serialize + DeserializeOwned + Send + 'static;

    /// Value sent back to the parent
    type Output: Serialize + DeserializeOwned + Send + 'static;

    /// Run to completion on the worker's private runtime
    async fn run(&self, input: Self::Input) -> anyhow::Result<Self::Output>;
}

/// Object-safe form of [`Computation`] working on JSON values
#[async_trait]
pub trait ErasedComputation: Send + Sync {
    fn name(&self) -> &'static str;

    async fn call(&self, payload: serde_json::Value) -> anyhow::Result<serde_json::Value>;
}

struct Erased<C>(C);

#[async_trait]
impl<C: Computation> ErasedComputation for Erased<C> {
    fn name(&self) -> &'static str {
        C::NAME
    }

    async fn call(&self, payload: serde_json::Value) -> anyhow::Result<serde_json::Value> {
        let input: C::Input = serde_json::from_value(payload).map_err(|e| {
            anyhow::anyhow!("invalid payload for computation `{}`: {}", C::NAME, e)
        })?;
        let output = self.0.run(input).await?;
        Ok(serde_json::to_value(output)?)
    }
}

/// Computations a worker can run, by name
#[derive(Clone, Default)]
pub struct ComputationRegistry {
    entries: BTreeMap<&'static str, Arc<dyn ErasedComputation>>,
}

impl ComputationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a computation (builder style); a later registration of the same
    /// name replaces the earlier one
    pub fn with<C: Computation>(mut self, computation: C) -> Self {
        self.register(computation);
        self
    }

    pub fn register<C: Computation>(&mut self, computation: C) {
        self.entries.insert(C::NAME, Arc::new(Erased(computation)));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ErasedComputation>> {
        self.entries.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Registered names, sorted
    pub fn names(&self) -> Vec<&'static str> {
        self.entries.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
