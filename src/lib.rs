//! Hemmer provider for MySQL
//!
//! Manages databases on a MySQL or MariaDB server through the Hemmer
//! provider protocol, a gRPC service modelled on
//! [terraform-plugin-go](https://github.com/hashicorp/terraform-plugin-go).
//!
//! # Overview
//!
//! - **Configuration**: endpoint, credentials, TLS and pool settings, with
//!   `MYSQL_*` environment fallbacks ([`config`])
//! - **Connection**: driver options from the configuration ([`dsn`]), an
//!   optional SOCKS5 proxy ([`proxy`]) and a connect loop that waits for a
//!   freshly provisioned server ([`connector`], [`retry`])
//! - **Resources**: `mysql_database` ([`database`])
//! - **Protocol**: the [`ProviderService`] trait and the gRPC server that
//!   exposes it ([`server`])
//!
//! # Handshake Protocol
//!
//! When the provider starts via [`serve`], it outputs a handshake string to
//! stdout:
//!
//! ```text
//! HEMMER_PROVIDER|1|127.0.0.1:50051
//! ```
//!
//! Format: `HEMMER_PROVIDER|<protocol_version>|<address>`. Logs go to stderr.
//!
//! # Example
//!
//! ```ignore
//! use hemmer_provider_mysql::{init_logging, serve, MysqlProvider};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     init_logging();
//!     serve(MysqlProvider::new()).await
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod client;
pub mod config;
pub mod connector;
pub mod database;
pub mod dsn;
pub mod error;
pub mod logging;
pub mod provider;
pub mod proxy;
pub mod retry;
pub mod schema;
pub mod server;
pub mod testing;
pub mod types;
pub mod validation;

#[allow(missing_docs)]
#[allow(clippy::all)]
pub mod generated;

// Re-export main types at crate root
pub use client::{MySqlClient, SqlClient};
pub use config::ProviderConfig;
pub use error::ProviderError;
pub use logging::{init_logging, init_logging_with_default, try_init_logging};
pub use provider::MysqlProvider;
pub use schema::ProviderSchema;
pub use server::{serve, serve_on, serve_with_options, ProviderService, ServeOptions};
pub use types::{
    AttributeChange, ImportedResource, PlanResult, ProviderMetadata, ServerCapabilities,
    HANDSHAKE_PREFIX, PROTOCOL_VERSION,
};

// Re-export async_trait for convenience
pub use async_trait::async_trait;
