//! Assembly-level program representation
//!
//! Everything between the raw 64-bit instruction words and the typed
//! analysis CFG: the structured instruction model, the decoder that produces
//! it, and the label-keyed control-flow graph with its lowering into
//! non-deterministic form.

pub mod cfg;
pub mod syntax;
pub mod unmarshal;
