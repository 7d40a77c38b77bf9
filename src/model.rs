mod campaign;
mod prospect;
mod queue;
mod tracking;

#[cfg(test)]
pub(crate) use campaign::fixtures;
pub use campaign::{Campaign, CampaignStep, NewCampaign};
pub use prospect::{NewProspect, Prospect, ProspectStatus};
pub use queue::{advance, NewQueueItem, QueueEvent, QueueItem, QueueStatus, Transition};
pub use tracking::{NewTrackingEvent, TrackingEvent, TrackingEventType};
