pub mod event;
pub mod execution;
pub mod routing;
pub mod rule;
