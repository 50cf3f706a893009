//! Subcommands of the command-line interface besides `run`.

pub mod validate;

pub use validate::ValidateArgs;
