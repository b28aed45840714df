// src/providers/mod.rs
pub mod gundi;
pub mod inaturalist;
pub mod media;
