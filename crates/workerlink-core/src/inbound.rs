//! Turns channel deliveries back into individual envelopes.

use tracing::warn;

use crate::channel::{Delivery, Payload};
use crate::envelope::Envelope;

/// Expand one delivery into envelopes, preserving list order.
///
/// A bare message keeps the transfer set it arrived with. Batches never carry
/// handles; if one does, the handles are released and a warning is logged.
pub fn expand(delivery: Delivery) -> Vec<Envelope> {
    let Delivery { payload, transfer } = delivery;
    match (payload, transfer) {
        (Payload::Single(message), Some(set)) => {
            vec![Envelope::new(message).with_transfer_set(set)]
        }
        (Payload::Single(message), None) => vec![Envelope::new(message)],
        (Payload::Batch(messages), transfer) => {
            if let Some(set) = transfer {
                warn!(
                    messages = messages.len(),
                    handles = set.len(),
                    "Batch arrived with a transfer set, releasing handles"
                );
            }
            messages.into_iter().map(Envelope::new).collect()
        }
    }
}
