//! Development-mode ports for the `kb-ingest` daemon binary. The engine
//! itself lives in the `ingest-core`/`ingest-common` workspace members;
//! this crate only wires a runnable CLI on top of it.

pub mod adapters;
