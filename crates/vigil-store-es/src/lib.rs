pub mod client;
pub mod error;
pub mod registry;
pub mod state_store;
pub mod transport;
pub mod wire;

pub use client::EsQueryClient;
pub use registry::ClientRegistry;
pub use state_store::EsStateStore;
pub use transport::EsTransport;
