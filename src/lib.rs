//! CI mail → board sync: turns CI notification emails into board work items.

pub mod board;
pub mod channels;
pub mod config;
pub mod error;
pub mod pipeline;
