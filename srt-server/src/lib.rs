pub mod config;
pub mod protocol;
pub mod server;

pub use config::ServerConfig;
pub use server::Server;
