#![deny(clippy::expect_used)]
#![deny(clippy::unwrap_used)]

//! Fledge turns a running HTTP application into a deployable static site: it boots (or attaches
//! to) a server, crawls it breadth-first from a set of seed routes, and materializes every
//! response onto an output directory tree.
//!
//! The pipeline is the module list, front to back:
//!
//! - [`url_normalize`] — canonicalization and ignore-glob matching (Component A)
//! - [`html_extract`] — the tolerant link extractor (Component B)
//! - [`materializer`] — output-directory mapping and base-path rewriting (Component C)
//! - [`supervisor`] — child-process boot and teardown (Component D)
//! - [`crawl`] — the frontier-driven crawl engine (Component E)
//! - [`coordinator`] — wires the above together for one build (Component F)

pub mod cmd;
pub mod common;
pub mod config;
pub mod coordinator;
pub mod crawl;
pub mod error;
pub mod html_extract;
pub mod materializer;
pub mod supervisor;
pub mod url_normalize;
