// Adapters layer: concrete sources and sinks around the flattening stage.

pub mod sink;
pub mod source;
