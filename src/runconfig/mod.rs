//! Layered run-configuration store.
//!
//! - `node`: one XML document with its path and a `modified` flag
//! - `device`: per-hub device documents keyed by MBID
//! - `layout`: old vs new hub reference layout
//! - `tree`: the run configuration and everything it references

pub mod device;
pub mod layout;
pub mod node;
pub mod tree;

pub use device::*;
pub use layout::*;
pub use node::*;
pub use tree::*;
