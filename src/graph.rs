//! Weighted constraint graph and its storage primitives
//!
//! A difference-bound analysis spends most of its time relaxing edges of a
//! sparse weighted digraph whose vertices are numeric variables. The pieces
//! here are sized for that workload:
//! - [`SafeI64`]: edge-weight arithmetic that saturates instead of wrapping
//! - [`AdaptMap`]: per-vertex adjacency storage that adapts to density
//! - [`AdaptGraph`]: the digraph itself, with vertex and weight-slot recycling

mod adapt;
mod safeint;
mod smap;

pub use adapt::AdaptGraph;
pub use safeint::SafeI64;
pub use smap::AdaptMap;

#[cfg(test)]
mod tests;
