//! Neural Network Layers
//!
//! Dense and mixture-of-experts layers.
//!
//! @version 0.1.0
//! @author `zeroshard` Development Team

pub mod linear;
pub mod moe;

// Re-exports
pub use linear::Linear;
pub use moe::MoeLayer;
