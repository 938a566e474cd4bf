use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Behaviour when an inbound request targets a capability whose queue is full.
///
/// With [`OverflowPolicy::Reject`] the delivery worker answers the remote
/// caller with a "busy" error and moves on. With [`OverflowPolicy::Block`]
/// the worker waits until the local consumer drains the queue, which
/// occupies that worker for as long as the consumer stalls. At most
/// `dispatch_workers - 1` workers wait at once; requests beyond that are
/// answered as busy, so a single worker pool behaves as `Reject`.
#[derive(
    Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq, EnumString, Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum OverflowPolicy {
    /// Answer the remote with a busy error.
    #[default]
    Reject,
    /// Wait for the consumer.
    Block,
}
