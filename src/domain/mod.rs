// Domain layer - Fan state, readings and the rules that act on them
pub mod commands;
pub mod device_state;
pub mod error;
pub mod insights;
pub mod notice;
pub mod policy;
pub mod sensor;
