pub mod init;
pub mod monitor;
pub mod take;
pub mod validate;
pub mod verify;
