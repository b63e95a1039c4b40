//! Alert explanations backed by a local text-generation service

pub mod context;
pub mod generator;

pub use context::ExplanationContext;
pub use generator::{ExplanationGenerator, FALLBACK_EXPLANATION};
