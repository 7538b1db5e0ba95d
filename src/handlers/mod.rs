pub mod common;
pub mod extract;
pub mod movements;
pub mod products;
