pub use cancel_token::*;
pub use defer::*;

mod cancel_token;
mod defer;
pub mod logger;
