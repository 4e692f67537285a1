//! Replay side of a session

mod comparator;
mod engine;

pub use comparator::{
    build_comparator, AllOf, BodyEquality, Comparator, Fingerprint, HeaderSubset, MethodUri,
    Sequential, Verdict,
};
pub use engine::{ReplayState, ReplayStats, Replayer};
