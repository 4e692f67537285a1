//! Recording side of a session

mod recorder;

pub use recorder::Recorder;
