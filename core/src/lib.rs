//! Core domain logic for Warden.
//!
//! This crate assembles the protocol library from the registry and evaluates
//! requirements against the outside world. It holds no session state of its
//! own: callers pass the active frame and journal in.

pub mod clock;
pub mod handlers;
pub mod registry;

pub use clock::{Clock, ManualClock, SystemClock};
pub use handlers::{GateContext, Verdict, evaluate, evaluate_all};
pub use registry::{
    FlatRegistry, LibraryOrigin, LoadedProtocol, ModularRegistry, ProtocolLibrary,
    RegistryError, RegistrySource, load_library, select_source,
};
