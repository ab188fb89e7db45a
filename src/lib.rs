pub mod api;
pub mod auth;
pub mod controller;
pub mod crd;
pub mod db;
pub mod health;
pub mod model;
pub mod scheduler;
pub mod settings;

pub use api::{router, AppState};
pub use db::Database;
pub use scheduler::{Manager, PodSignal};
pub use settings::Settings;
