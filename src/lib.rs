//! Small pipelines of nodes chained by action transitions.
//!
//! A [`flow::Flow`] maps node ids to node factories and transition tables;
//! [`flow::Flow::run`] walks it from `start` until `end`, an unhandled
//! error, or the step budget, threading one [`state::Store`] through every
//! node. [`daemon::FlowDaemon`] keeps named flows around for a long-running
//! process.

pub mod config;
pub mod daemon;
pub mod flow;
pub mod flow_file;
pub mod logger;
pub mod node;
pub mod nodes;
pub mod registry;
pub mod state;
pub mod validation;
