//! # Overview
//!
//! A trace-processing engine built as a directed graph of components:
//! *sources* decode traces into a shared in-memory trace model, *filters*
//! transform the resulting message flow, and *sinks* consume it.
//!
//! * Trace structure follows the CTF shape (from the babeltrace2 docs):
//!   - Trace class → stream classes → event classes, instantiated as
//!     traces, streams and events
//!   - Streams are timelines; messages within one stream are totally
//!     ordered by their default clock snapshots
//!
//! The engine is single-threaded and cooperatively scheduled: sinks are
//! driven round-robin, and the `Again` status is the one suspension
//! primitive, propagated from iterators through sinks to the graph's
//! caller.
//!
//! Components are described by classes (see [`component`]), grouped into
//! [`plugin`]s, discovered for user inputs through the support-info
//! protocol ([`discover`]), and queried out-of-band without instantiation
//! ([`query`]).
#![deny(warnings, clippy::all)]

pub mod colander;
pub mod component;
pub mod components;
pub mod config;
pub mod connection;
pub mod discover;
pub mod error;
pub mod graph;
pub mod ir;
pub mod iterator;
pub mod message;
pub mod opts;
pub mod plugin;
pub mod pool;
pub mod port;
pub mod prelude;
pub mod query;
pub mod tracing;
pub mod types;
pub mod value;
