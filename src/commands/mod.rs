//! Subcommands other than the default build run

pub mod init;
