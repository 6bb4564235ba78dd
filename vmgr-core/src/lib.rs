//! Foundation types for the VM lifecycle orchestrator.
//!
//! This crate carries the pieces every other layer depends on: the shared
//! error type, stack identity and naming helpers, and secret generation.

pub mod error;
pub mod identity;
pub mod secrets;

pub use error::{Result, VmgrError};
pub use identity::{vm_stack_name, StackIdentity, NETWORK_STACK_NAME, VM_STACK_PREFIX};
