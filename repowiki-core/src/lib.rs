#![doc = "repowiki-core: documentation generation pipeline for source repositories."]

//! This crate holds the whole pipeline: job queue, orchestrating worker,
//! catalogue planning, bounded fan-out of topic generation and the optional
//! mermaid repair pass. Network, git and persistence are reached through the
//! traits in [`contract`]; [`git::GitCli`] and [`store::InMemoryStore`] are the
//! bundled implementations.
//!
//! # Usage
//! Build a [`pipeline::Pipeline`] and a [`service::DocumentationService`] over
//! the same [`queue::JobQueue`], submit addresses, then run or drain the pipeline.

pub mod catalogue;
pub mod config;
pub mod contract;
pub mod documents;
pub mod error;
pub mod extract;
pub mod fanout;
pub mod git;
pub mod mermaid;
pub mod model;
pub mod pipeline;
pub mod planner;
pub mod prompts;
pub mod queue;
pub mod retry;
pub mod service;
pub mod store;
pub mod tools;
pub mod topic;
