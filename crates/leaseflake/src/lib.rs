mod allocator;
mod config;
mod error;
mod generator;
mod layout;
mod lease;
#[cfg(test)]
mod mock;
mod status;
mod store;
mod time;

pub use crate::allocator::*;
pub use crate::config::*;
pub use crate::error::*;
pub use crate::generator::*;
pub use crate::layout::*;
pub use crate::lease::*;
pub use crate::status::*;
pub use crate::store::*;
pub use crate::time::*;
