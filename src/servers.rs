/// Contains ready-made service definitions which can be used in tests.
#[cfg(feature = "auth")]
pub mod auth;
#[cfg(feature = "database")]
pub mod database;
