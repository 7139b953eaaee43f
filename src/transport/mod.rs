//! [`Transport`](crate::interface::Transport) implementations.

mod memory;
#[cfg(unix)]
mod unix;

pub use memory::MemoryTransport;
#[cfg(unix)]
pub use unix::UnixDatagramTransport;
