//! Cassette storage: data model, line format, reader and writer

mod format;
mod reader;
mod writer;

pub use format::{
    decode_interactions, encode_interaction, Cassette, Headers, Interaction, SerializableRequest,
    SerializableResponse, RECORD_SEPARATOR,
};
pub use reader::read_cassette;
pub use writer::CassetteWriter;
