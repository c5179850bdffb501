//! Core evaluation model: fixed-point score pipelines, trace events, and the
//! binary file codecs they are loaded from and saved to.

pub use self::{
    digraph::Digraph,
    event::{Candidate, Event},
};

pub mod digraph;
pub mod event;
pub mod weights_file;

/// One trainable connection weight.
pub type Weight = i16;

/// One cell of an input matrix. Immutable after load.
pub type Input = u16;

/// Intermediate and sink values of a pipeline.
pub type Value = i64;

pub const MIN_WEIGHT: Weight = Weight::MIN;
pub const MAX_WEIGHT: Weight = Weight::MAX;

/// Number of distinct representable weights.
pub const WEIGHT_CARDINALITY: u32 = 1 << 16;
