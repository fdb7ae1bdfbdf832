pub mod engine;
pub mod executor;
pub mod generator;
pub mod openai;

pub use engine::{Answer, QueryEngine};
pub use executor::{AllowAll, QueryExecutor, ReadOnlyGate, Row, StatementGate};
pub use generator::{GeneratedQuery, QueryGenerator, StructuredGenerator, system_prompt};
pub use openai::OpenAiGenerator;
