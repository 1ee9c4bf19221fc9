pub mod account;
pub mod entity;
pub mod provider;
pub mod record;
pub mod session;
pub mod ticket;

pub use account::Account;
pub use entity::{Entity, EntityKind, Partition, Reference, ReferenceKind};
pub use provider::Provider;
pub use record::{new_public_id, RecordHeader};
pub use session::{DeviceInfo, Session};
pub use ticket::{EmailChangeTicket, ResetPasswordTicket, Ticket, VerificationTicket};
