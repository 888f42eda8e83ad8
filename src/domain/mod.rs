// Domain layer: tabular model and the ports the workflows are written against.

pub mod model;
pub mod ports;
