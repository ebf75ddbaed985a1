//! Configuration model
//!
//! Config text is decoded once into a [`ConfigNode`] tree. Builders then pull
//! typed payloads out of nodes with [`ConfigNode::decode_as`].

mod decode;
mod node;

pub use decode::{decode, load, parse_duration};
pub use node::ConfigNode;
