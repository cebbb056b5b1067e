pub mod address;
pub mod audit;
pub mod media;

pub use address::{AddressError, AddressServer, ChatAddress};
pub use audit::{AuditEvent, AuditLogger, AuditStatus};
pub use media::MediaKind;
