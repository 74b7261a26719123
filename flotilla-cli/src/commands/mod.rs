pub mod add;
pub mod daemon;
pub mod list;
pub mod watch;
