//! WebSocket wire protocol: the opening handshake key and frame codec.
//!
//! Connection state, message queues and flow control live with the server; this
//! module only knows bytes.

mod frame;
mod handshake;

pub use frame::{
    Frame, FrameDecoder, FrameInfo, MAX_CONTROL_PAYLOAD, MAX_FRAME_PAYLOAD, Opcode, frame_window, send_frame,
};
pub use handshake::accept_key;
