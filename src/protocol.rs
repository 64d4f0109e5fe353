// author: kodeholic (powered by Claude)

pub mod close_code;
pub mod codec;
pub mod message;
pub mod opcode;

pub use codec::{decode, encode, Command, Event};
