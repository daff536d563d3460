//! CLI Commands

pub mod artifact;
pub mod run;
