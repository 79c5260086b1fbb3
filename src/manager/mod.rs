pub mod actions;
pub mod notifier;
pub mod session;
pub mod supervisor;
pub mod task_store;
