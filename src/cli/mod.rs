pub mod args;

pub use args::{Args, Command, DEFAULT_CONFIG_PATH};
