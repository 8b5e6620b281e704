//! Ingest password-protected bank statement PDFs into a deduplicated SQLite ledger.
//!
//! [`pipeline::Pipeline`] ties the stages together; the `ledgr` binary in
//! `main.rs` is a thin clap front end over [`cli`].

pub mod builder;
pub mod cli;
pub mod db;
pub mod decrypt;
pub mod error;
pub mod extract;
pub mod fmt;
pub mod layout;
pub mod ledger;
pub mod models;
pub mod normalize;
pub mod pipeline;
pub mod settings;
pub mod source;
