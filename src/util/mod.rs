pub mod clock;
pub(crate) mod retry;
