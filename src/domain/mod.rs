//! Domain layer: machine definitions, entity state, the pure transition
//! evaluator and the storage ports the application layer drives.

pub mod entity;
pub mod event;
pub mod evaluator;
pub mod evolution;
pub mod machine;
pub mod ports;
pub mod record;
