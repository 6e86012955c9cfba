//! JSON wire formats. Each room protocol has its own shapes.

pub mod room_server;
pub mod smoke_signal;
