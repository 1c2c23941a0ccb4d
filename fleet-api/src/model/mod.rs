pub mod account;
pub mod ids;
pub mod instance;
pub mod market;
pub mod order;
