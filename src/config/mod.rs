pub mod settings;

pub use self::settings::{validate_api_key, ApiKey, Provider, Settings};
