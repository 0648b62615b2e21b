pub mod api;
pub mod config;
pub mod expiration;
mod orm;
pub mod redirect_resolver;
pub mod short_code;
pub mod shortening_service;
pub mod url_store;
