//! WebSocket transport for displays and the admin controller

pub mod handler;
pub mod protocol;
