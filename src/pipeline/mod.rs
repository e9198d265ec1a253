//! Sync pipeline.
//!
//! Every unread notification flows through:
//! 1. `SenderRegistry::resolve()`: which CI system sent it
//! 2. `EventClassifier::classify()`: outcome from ordered rules
//! 3. `DetailExtractor::extract()`: structured fields from the body
//! 4. `BoardStateMapper::map()`: board state, tags and fields
//! 5. `SyncEngine::process()`: create the work item, then consume the email

pub mod classifier;
pub mod engine;
pub mod extractor;
pub mod mapper;
pub mod registry;
pub mod types;
