// Domain layer: core models and ports (interfaces).

pub mod model;
pub mod period;
pub mod ports;
pub mod source;
