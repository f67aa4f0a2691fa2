//! Pathway Sim - synthetic patient histories from declarative clinical modules

pub mod core;
pub mod entity;
pub mod module;
pub mod simulation;
