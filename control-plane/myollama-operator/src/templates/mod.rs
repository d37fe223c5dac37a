pub mod desired;
pub mod fingerprint;
pub mod owner;

pub use desired::*;
pub use fingerprint::*;
pub use owner::*;
