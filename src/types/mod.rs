pub mod api;
pub mod market;
pub mod strategy;
pub mod trading;

pub use api::*;
pub use market::*;
pub use strategy::*;
pub use trading::*;
