//! Query engine: context → generation → execution

use std::future::Future;

use serde::Serialize;

use crate::context::{SchemaContext, SchemaContextGenerator};
use crate::storage::SqliteStore;
use crate::Result;

use super::executor::{QueryExecutor, Row};
use super::generator::{GeneratedQuery, QueryGenerator};

/// Result of [`QueryEngine::ask`]
#[derive(Debug, Clone, Serialize)]
pub struct Answer {
    pub query: GeneratedQuery,
    pub rows: Vec<Row>,
}

/// Ties the grounding context, the generator and the executor together
pub struct QueryEngine {
    context: SchemaContextGenerator,
    generator: QueryGenerator,
    executor: QueryExecutor,
}

impl QueryEngine {
    pub fn new(
        context: SchemaContextGenerator,
        generator: QueryGenerator,
        executor: QueryExecutor,
    ) -> Self {
        Self {
            context,
            generator,
            executor,
        }
    }

    /// Fresh grounding context for the current store contents
    pub fn context(&self, store: &SqliteStore) -> Result<SchemaContext> {
        self.context.generate(store)
    }

    /// Generate SQL for `prompt`, grounded in the current store contents.
    ///
    /// The context is read before the future is built, so the future does not
    /// borrow the store and stays `Send`.
    pub fn generate<'a>(
        &'a self,
        store: &SqliteStore,
        prompt: &'a str,
    ) -> impl Future<Output = Result<GeneratedQuery>> + Send + 'a {
        let context = self.context(store);
        async move {
            let context = context?;
            self.generator.generate(prompt, &context).await
        }
    }

    /// Run SQL verbatim through the configured gate
    pub fn execute(&self, store: &SqliteStore, sql: &str) -> Result<Vec<Row>> {
        self.executor.execute(store, sql)
    }

    /// Generate, then execute.
    ///
    /// The store is borrowed across the model call and `Connection` is not `Sync`,
    /// so this future is not `Send`. Call [`Self::generate`] and [`Self::execute`]
    /// separately to generate off the store's thread.
    pub async fn ask(&self, store: &SqliteStore, prompt: &str) -> Result<Answer> {
        let query = self.generate(store, prompt).await?;
        let rows = self.execute(store, &query.sql)?;
        tracing::info!("'{}' returned {} rows", prompt, rows.len());
        Ok(Answer { query, rows })
    }
}
