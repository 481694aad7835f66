/// Contains service definitions for database servers.
pub mod postgres;
pub mod redis;
