//! Middle-end and assembly backends for a small procedural C subset.
//!
//! The crate owns everything between a checked syntax tree and the final
//! assembly text: the type universe ([`types`]), lexically scoped symbol
//! tables with stack-slot allocation ([`symbols`]), the three-address IR
//! organized as basic blocks in per-function control-flow graphs ([`ir`]),
//! the read-only data and global variable managers ([`rodata`], [`globals`])
//! and the per-target lowerings behind one backend contract ([`target`]).
//!
//! The front half of the pipeline (grammar, syntax tree, semantic analysis,
//! IR construction) lives in the `cfront` crate and drives this one.

pub mod globals;
pub mod ir;
pub mod rodata;
pub mod symbols;
pub mod target;
pub mod types;

/// Size in bytes of one stack slot. Every scalar occupies one slot; `char`
/// values are widened to 32 bits in the IR.
pub const SLOT_BYTES: i32 = 4;
