pub mod config;
pub mod db;
pub mod dtos;
pub mod handlers;
pub mod models;
pub mod modules;
pub mod services;
pub mod startup;
pub mod utils;

pub use modules::{compose_modules, Dependencies, RouteModule};
pub use startup::{build_router, Application};
