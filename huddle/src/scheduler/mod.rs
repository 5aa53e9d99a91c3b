//! Time-driven notification work.
//!
//! Two duty cycles run on independent timers:
//! - the reminder cycle notifies event participants at fixed milestones
//!   before an event starts
//! - the campaign cycle executes scheduled and recurring campaigns

pub mod campaigns;
pub mod recurrence;
pub mod reminders;
mod service;

pub use campaigns::{CampaignCycleReport, CampaignService, NewCampaign};
pub use recurrence::RecurrenceRule;
pub use reminders::{MILESTONES, Milestone, ReminderCycle, ReminderCycleReport};
pub use service::SchedulerService;
