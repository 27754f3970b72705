pub mod core;
pub use crate::core::config::*;
pub use crate::core::errors::*;
pub use crate::core::logging::*;
pub use crate::core::state::*;
pub use crate::core::structs::*;

pub mod feedback;
pub use feedback::codec::*;
pub use feedback::listener::*;
pub use feedback::parser::*;
pub use feedback::store::*;

pub mod control;
pub use control::generator::*;
pub use control::sender::*;
pub use control::sockets::*;
pub use control::templates::*;
pub use control::urscript::*;

pub mod fabrication;
pub use fabrication::sequencer::*;
pub use fabrication::task::*;
