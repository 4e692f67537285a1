//! Proxy integration for recording and replay
//!
//! A [`VcrProxy`] owns one [`Session`] for its whole life; the mode never
//! changes after startup.

mod http;
mod session;

use std::fmt;

pub use http::VcrProxy;
pub use session::Session;

use crate::config::Mode;

impl Mode {
    /// Requests go to the origin and are appended to the cassette
    #[must_use]
    pub fn is_record(&self) -> bool {
        matches!(self, Mode::Record)
    }

    /// Requests are answered from the cassette only
    #[must_use]
    pub fn is_replay(&self) -> bool {
        matches!(self, Mode::Replay)
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Mode::Record => "record",
            Mode::Replay => "replay",
        })
    }
}
