//! Command implementations, one module per subcommand.

pub mod classify;
pub mod init;
pub mod parse_logs;
pub mod patterns;
pub mod run;
