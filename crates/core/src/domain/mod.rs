pub mod account;
pub mod company;
pub mod order;
pub mod product;
pub mod progress;
