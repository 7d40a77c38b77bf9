use base64::{
    alphabet,
    engine::{self, general_purpose},
    Engine as _,
};

use super::SigningKey;

lazy_static::lazy_static! {
    // URL-safe engine, tracking ids end up in paths
    static ref BASE64_ENGINE: engine::GeneralPurpose =
        engine::GeneralPurpose::new(&alphabet::URL_SAFE, general_purpose::NO_PAD);
}

/// Bytes of the HMAC kept in a tracking id
const MAC_LENGTH: usize = 12;

/// Tracking id for one link of one email: `"{pixel_id}.{mac}"`, where the
/// mac signs the pixel id together with the destination URL
pub fn click_tracking_id(key: &SigningKey, pixel_id: &str, url: &str) -> String {
    let msg = format!("{}|{}", pixel_id, url);
    let sig = key.sign(msg.as_bytes());
    format!("{}.{}", pixel_id, BASE64_ENGINE.encode(&sig[..MAC_LENGTH]))
}

/// The pixel id a tracking id was derived from
pub fn pixel_id_of(tracking_id: &str) -> Option<&str> {
    let (pixel_id, mac) = tracking_id.split_once('.')?;
    if pixel_id.is_empty() || mac.is_empty() {
        return None;
    }
    Some(pixel_id)
}
