//! `jobgate` binary support: logging setup and the stdio / HTTP servers.

pub mod logging;
pub mod server;
