pub mod init;
pub mod store;
pub mod workflow;
