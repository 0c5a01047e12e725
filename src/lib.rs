//! Serial client for Büchi temperature controllers.
//!
//! The crate is layered the same way the wire protocol is:
//!
//! - [`adapters`] frames commands as `<cmd>[ <param>]\r` and reads back the
//!   `<value>\r\n` reply of get-type commands, one exchange at a time.
//! - [`hardware`] maps named controller properties onto `in_`/`out_`
//!   commands and parses their values.
//! - [`data`] samples heating power and temperatures at a fixed interval
//!   into an append-only CSV log.
//!
//! [`config`] and [`error`] are shared by all layers.

pub mod adapters;
pub mod config;
pub mod data;
pub mod error;
pub mod hardware;
