/// Contains service definitions for identity and OAuth2 servers.
pub mod hydra;
