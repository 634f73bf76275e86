pub mod common;
pub mod fill;
pub mod price;
pub mod vault;
