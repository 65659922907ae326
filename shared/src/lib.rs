pub mod custom_resource;
pub mod error;
pub mod events;
pub mod iam;
pub mod layers;
pub mod log_groups;
pub mod pool_users;
pub mod rest_api;
pub mod slack;

pub use error::ProvisionError;
