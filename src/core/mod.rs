pub mod app_state;
pub mod error;
pub mod events;
pub mod pipeline;
pub mod settings;
