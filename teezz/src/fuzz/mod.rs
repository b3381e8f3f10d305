//! The fuzz loop and its supporting campaign state (spec.md §4.6).

pub mod campaign;
pub mod population;
pub mod stats;

pub use campaign::FuzzCampaign;
pub use population::Population;
pub use stats::CampaignStats;
