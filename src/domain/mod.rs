// Domain layer: records flowing through the pipeline and the ports around them.

pub mod model;
pub mod ports;
