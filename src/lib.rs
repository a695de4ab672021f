//! Convo Flow: stage-based conversation flow engine.

pub mod cli;
pub mod collab;
pub mod config;
pub mod error;
pub mod flow;
pub mod llm;
pub mod policy;
pub mod routes;
pub mod session;
