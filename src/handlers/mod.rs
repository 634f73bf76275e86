pub mod fill;
pub mod price;
pub mod vault;
pub mod wallet;
