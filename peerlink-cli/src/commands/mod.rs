pub mod did;
pub mod message;
