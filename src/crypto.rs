mod signing_key;
mod tracking_id;

pub use signing_key::SigningKey;
pub use tracking_id::{click_tracking_id, pixel_id_of};
