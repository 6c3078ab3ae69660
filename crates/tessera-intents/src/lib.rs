//! Tessera Intents - Intention handlers and submission
//!
//! Each action has a handler that consults the deposit ledger, the vault
//! registry and the chain, and turns a signed intention into proof entries.
//! [`IntentionService`] dispatches to the handlers and queues accepted
//! intentions in the sequencer's cache.
//!
//! | Action          | Effect                                                     |
//! |-----------------|------------------------------------------------------------|
//! | `assign_deposit`| Holds free deposit value for output vaults                 |
//! | `create_vault`  | Creates the vault on-chain, mirrors it, seeds it           |
//! | `update_vault`  | Changes controllers or rules; caller must be a controller  |
//! | `seed_vault`    | Initial grants; produced by the node only                  |

pub mod context;
pub mod discovery;
pub mod error;
pub mod handlers;
pub mod service;

pub use context::{HandlerContext, IntentsConfig, SeedGrant};
pub use discovery::DepositDiscovery;
pub use error::{IntentError, Result};
pub use handlers::{HandlerOutput, HandlerRequest, IntentionHandler};
pub use service::IntentionService;
