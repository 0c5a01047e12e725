//! Byte-level links to the controller.

pub mod command_transport;

pub use command_transport::CommandTransport;
