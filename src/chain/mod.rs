//! Block and chain model: headers, merkle trees, proof of work, and
//! difficulty retargeting.

pub mod block;
pub mod difficulty;

pub use block::{Block, BlockHeader};
