pub mod activity;
pub mod invoice;
pub mod pricing;
pub mod project;
pub mod session;
pub mod store;
pub mod task;
