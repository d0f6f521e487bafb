//! Decides which locally dispatched envelopes cross to the other context.

use std::sync::Arc;

use workerlink_config::LinkSettings;

use crate::envelope::Envelope;

type Predicate = Arc<dyn Fn(&Envelope) -> bool + Send + Sync>;

/// Boundary filter evaluated once per locally dispatched envelope.
#[derive(Clone, Default)]
pub enum BoundaryFilter {
    /// Only envelopes marked with [`Envelope::mark_crossing`] cross.
    #[default]
    Marked,
    /// Every envelope crosses.
    All,
    /// A caller-supplied pure predicate.
    Predicate(Predicate),
}

impl BoundaryFilter {
    pub fn predicate<F>(f: F) -> Self
    where
        F: Fn(&Envelope) -> bool + Send + Sync + 'static,
    {
        BoundaryFilter::Predicate(Arc::new(f))
    }

    pub fn from_settings(settings: &LinkSettings) -> Self {
        if settings.forward_all {
            BoundaryFilter::All
        } else {
            BoundaryFilter::Marked
        }
    }

    pub fn should_cross(&self, envelope: &Envelope) -> bool {
        match self {
            BoundaryFilter::Marked => envelope.is_crossing(),
            BoundaryFilter::All => true,
            BoundaryFilter::Predicate(f) => f(envelope),
        }
    }
}

impl std::fmt::Debug for BoundaryFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BoundaryFilter::Marked => f.write_str("Marked"),
            BoundaryFilter::All => f.write_str("All"),
            BoundaryFilter::Predicate(_) => f.write_str("Predicate(..)"),
        }
    }
}
