mod replay;
mod stub;

pub use replay::{ReplayBackend, ReplayEntry};
pub use stub::StubBackend;
