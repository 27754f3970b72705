pub mod codec;
pub mod listener;
pub mod parser;
pub mod store;
