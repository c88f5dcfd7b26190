//! # Pipeline Engine
//!
//! An ordered sequence of typed steps that validates its type flow
//! once at bind time and then runs as an ordinary task handler (spec
//! §4.9). See [`builder::PipelineBuilder`] for the entry point.

mod builder;
mod io;
mod step;

pub use builder::{Pipeline, PipelineBuilder, PipelineDescriptor};
pub use io::{StepInput, StepOutput};
pub use step::PipelineStep;
