//! Delta-compressed state pipeline: chunk wire types, encoder, decoder.

mod chunk;
mod decoder;
mod encoder;

pub use chunk::{
    CellColumns, Chunk, ChunkCodecError, ChunkCorrupted, DeltaType, OrganismState, PluginState,
    TickData, TickDelta,
};
pub use decoder::DeltaDecoder;
pub use encoder::DeltaEncoder;
