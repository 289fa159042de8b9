// Domain layer: screening models, criteria tags and ports.

pub mod criteria;
pub mod model;
pub mod ports;
