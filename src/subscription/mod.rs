pub mod api;
pub mod models;
pub mod service;
pub mod store;

pub use models::{SubscriptionStatus, UsageAccount};
pub use service::SubscriptionService;
pub use store::{AccountStore, PgAccountStore, WindowReset};
