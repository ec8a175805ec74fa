//! # Access Test Utilities
//!
//! Shared test utilities for the access service:
//! - Deterministic crypto fixtures (master key, SSH CA key)
//! - Database seeding for the platform records the service reads
//! - Server test harness (`TestAccessServer` for E2E tests)
//! - In-process SSH node (`TestSshNode`) for terminal streaming tests
//!
//! ## Usage
//!
//! ```rust,ignore
//! use access_test_utils::*;
//!
//! #[sqlx::test(migrations = "../../migrations")]
//! async fn test_example(pool: PgPool) -> Result<(), anyhow::Error> {
//!     let api_key = seed_api_key(&pool, "key-1").await?;
//!     let server = TestAccessServer::spawn(pool).await?;
//!     // ...
//!     Ok(())
//! }
//! ```

pub mod crypto_fixtures;
pub mod fixtures;
pub mod server_harness;
pub mod ssh_node;

pub use crypto_fixtures::*;
pub use fixtures::*;
pub use server_harness::*;
pub use ssh_node::*;
