// src/handlers/mod.rs

pub mod admin;
pub mod attempts;
pub mod stats;
