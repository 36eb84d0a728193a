pub mod connect;

pub use connect::{ConnectProcessor, OnboardingUrls};
