//! Tessera Sequencer - Bundling and publishing of processed intentions
//!
//! Handlers append processed intentions to the [`IntentionCache`]. The
//! [`BundleSequencer`] drains the cache on a fixed interval into a signed
//! bundle with the next nonce, persists it through a [`BundleStore`] and
//! hands it to the [`PublishPipeline`], which uploads the payload, anchors
//! it on-chain, then archives it and notifies the webhook in the background.

pub mod cache;
pub mod error;
pub mod pipeline;
pub mod sequencer;
pub mod store;

pub use cache::IntentionCache;
pub use error::{PublishStage, Result, SequencerError};
pub use pipeline::{BundleNotification, DetachedTasks, PublishPipeline, PublishReceipt, WebhookSink};
pub use sequencer::{BundleSequencer, CycleOutcome, SequencerConfig, SequencerState};
pub use store::{BundleStore, InMemoryBundleStore, PgBundleStore};
