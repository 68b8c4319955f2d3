pub mod check;
pub mod config;
pub mod groups;
pub mod watch;
