pub mod metadata;
pub mod server;

pub use server::BridgeServer;
