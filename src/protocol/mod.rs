pub mod awa;
pub mod checksum;
pub mod parser;

pub use awa::encode_frame;
pub use parser::{ColorMode, FrameParser, ParseEvent};
