pub mod engine;
pub mod normalize;

pub use engine::*;
pub use normalize::*;
