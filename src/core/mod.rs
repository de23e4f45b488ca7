pub mod events;
pub mod pipeline;
