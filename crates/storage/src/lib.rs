//! SQLite-backed usage ledger and conversation store for modelhub.
//!
//! This crate persists two things on behalf of the generation gateway:
//!
//! 1. **Usage ledger**: one append-only row per completed generation, with
//!    token counts, cost, and latency. Queried through aggregation.
//!
//! 2. **Conversations**: a keyed table of message histories, upserted by id.
//!
//! # Core Concepts
//!
//! ## Recorder
//!
//! The [`Recorder`] trait is the data-access contract the orchestrator is
//! written against. [`Store`] is the SQLite implementation; it serializes
//! access to a single connection so concurrent writers never interleave a
//! partial row.
//!
//! ## UsageRecord / UsageSummary
//!
//! A [`UsageRecord`] is one ledger row. [`Recorder::aggregated_stats`] folds
//! rows into [`UsageSummary`] values grouped by [`GroupBy::Model`] or
//! [`GroupBy::Provider`], busiest group first.
//!
//! ## Conversation
//!
//! [`NewConversation`] is the upsert payload. Saving an existing id
//! overwrites everything except `created_at`.
//!
//! # Example
//!
//! ```no_run
//! use storage::{GroupBy, Message, NewConversation, Recorder, Store};
//!
//! let store = Store::open("models.db")?;
//!
//! let conversation = NewConversation::new(
//!     None,
//!     "Greeting",
//!     "llama3",
//!     "ollama",
//!     vec![Message::user("Hello!"), Message::assistant("Hi there.")],
//! );
//! store.save_conversation(&conversation)?;
//!
//! for summary in store.aggregated_stats(GroupBy::Provider)? {
//!     println!("{}: {} requests", summary.group_key, summary.total_requests);
//! }
//! # Ok::<(), storage::Error>(())
//! ```

mod error;
mod record;
mod store;

pub use error::{Error, Result};
pub use record::{
    Conversation, ConversationSummary, GroupBy, Message, NewConversation, Role, UsageFilter,
    UsageRecord, UsageSummary,
};
pub use store::{Recorder, Store};
