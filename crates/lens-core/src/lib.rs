//! Core types for corridor-lens: the transaction data model, derived metric records,
//! stores, the resolver contract, and conversation sessions.

pub mod classifier;
pub mod config;
pub mod error;
pub mod metrics;
pub mod resolver;
pub mod session;
pub mod store;
pub mod types;

pub use classifier::{IntentClassifier, OpenAiClassifier};
pub use config::AppConfig;
pub use error::{LensError, Result};
pub use resolver::{QueryResolver, Resolution};
pub use session::{Session, SessionManager, SessionState};
pub use store::{InMemoryStore, JsonFileStore, TransactionStore};
pub use types::{ConversationMessage, Intent, QueryFilter, QueryTrace, TimeWindow, Transaction};
