//! CLI module for speclooper - command-line interface and subcommands.

pub mod commands;

pub use commands::Cli;
