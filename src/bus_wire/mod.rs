//! Wire-level frame types and the incremental stream parser for the
//! line-oriented broker protocol.

pub mod frame;
pub mod stream;

pub use frame::{ClientFrame, ConnectBody, FrameError, ServerFrame, ServerInfo};
pub use stream::FrameParser;
