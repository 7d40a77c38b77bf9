pub mod campaigns;
pub mod prospects;
pub mod tracking;
