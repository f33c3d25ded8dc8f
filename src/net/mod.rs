pub mod epoll;
pub mod socket;

pub use epoll::{AddOptions, Epoll};
