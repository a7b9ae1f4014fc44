pub mod cli;
pub mod load_config;
pub mod plugins;

pub use cli::{run, Cli};
