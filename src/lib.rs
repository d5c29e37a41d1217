// This file makes items available to the binaries and integration tests.

pub mod acquire;
pub mod annotation;
pub mod cli;
pub mod commands;
pub mod derep;
pub mod errors;
pub mod hmo;
pub mod pipeline;
pub mod plot;
pub mod references;
pub mod report;
pub mod samples;
pub mod sylph;
pub mod taxonomy;
pub mod tools;
pub mod utils;
