mod client_info;
mod email_address;
mod person_name;
mod segment;

pub use client_info::{ClientFamily, ClientMetadata, DeviceClass};
pub use email_address::EmailAddress;
pub use person_name::{BusinessName, PersonName};
pub use segment::Segment;
