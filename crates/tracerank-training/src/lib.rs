//! The training engine: a randomized, multi-threaded search over the weight
//! vector shared by every event's digraphs.
//!
//! Training is not gradient-based. Each cycle the [`crafter`](crate::crafter)
//! proposes a perturbed weight vector, the [`pool`](crate::pool) evaluates
//! every event's digraphs under it in parallel, and the
//! [`trainer`](crate::trainer) sums the winners' ranks and tells the crafter
//! whether the proposal beat the best total seen so far. The weight vector
//! with the smallest observed rank total is what the run persists.

pub use self::{
    crafter::{GeometricCrafter, WeightsCrafter},
    pool::WorkerPool,
    trainer::{TrainOutcome, Trainer},
};

pub mod crafter;
pub mod pool;
pub mod trainer;
