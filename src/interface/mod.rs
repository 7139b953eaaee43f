pub mod message;
pub mod transport;

pub use message::{LeaseRequest, LeaseResponse, RequestKind, RequesterId, ResponseKind};
pub use transport::{ChannelId, Delivery, Transport};
