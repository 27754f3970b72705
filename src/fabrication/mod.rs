pub mod sequencer;
pub mod task;
