pub mod generator;
pub mod sender;
pub mod sockets;
pub mod templates;
pub mod urscript;
