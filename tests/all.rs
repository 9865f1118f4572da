//! Integration test aggregator
//!
//! Drives the `warden` binary against throwaway project roots.
//! Individual test modules are declared in `suite/mod.rs`.

mod common;
mod suite;
