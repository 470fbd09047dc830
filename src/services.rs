pub mod activity;
pub mod invoices;
pub mod projects;
pub mod session;
pub mod tasks;
pub mod users;
