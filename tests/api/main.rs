mod campaigns;
mod health_check;
mod helpers;
mod prospects;
mod tracking;
