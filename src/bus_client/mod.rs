pub mod client;
pub mod engine;
pub mod error;
pub mod executor;
pub mod opts;
pub mod server_list;
pub mod subscription;
pub mod transport;

pub use client::{BusClient, Registration, Request, SubscribeOptions};
pub use engine::{ConnectionState, ConnectionStateListener};
pub use error::{ClientError, ClientResult};
pub use executor::CallbackExecutor;
pub use opts::{ClientOptions, ClientOptionsBuilder};
pub use server_list::{Endpoint, ServerList};
pub use subscription::{Message, MessageHandler, Subscription};
