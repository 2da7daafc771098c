//! 子命令

pub mod check_config;
pub mod run;

pub use check_config::CheckConfigCommand;
pub use run::RunCommand;
