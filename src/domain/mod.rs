//! Typed records the realtime layer publishes.

pub mod order;
pub mod quote;

pub use order::*;
pub use quote::*;
