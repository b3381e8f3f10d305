pub mod bytes_io;
pub mod call;
pub mod config;
pub mod dependency;
pub mod device;
pub mod error;
pub mod eval;
pub mod eventlog;
pub mod fuzz;
pub mod mutate;
pub mod probevaldep;
pub mod runner;
pub mod seed;
pub mod sequence;
pub mod template;
pub mod triage;

pub mod recovery;

pub use config::Config;
pub use error::{Result, TeezzError};
