pub mod config;
pub mod context;
pub mod error;
pub mod form;
pub mod identity;
pub mod logging;
pub mod markup;
pub mod mode;
pub mod notify;
pub mod page;
pub mod perms;
pub mod runtime;
pub mod store;
pub mod url;
pub mod view;
