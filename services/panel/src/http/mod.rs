pub mod admin;
pub mod node_config;
pub mod response;
pub mod sse;
