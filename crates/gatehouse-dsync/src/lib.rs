//! Directory sync engine for Gatehouse
//!
//! Ingests SCIM 2.0 lifecycle requests from external directories, keeps
//! tenant-scoped user/group state, and republishes every change as an
//! HMAC-signed webhook event with an audit log of deliveries.

pub mod diff;
pub mod directories;
pub mod event_log;
pub mod events;
pub mod groups;
pub mod scim;
pub mod users;

pub use directories::DirectoryController;
pub use event_log::WebhookEventsLogger;
pub use events::{EventDispatcher, HttpWebhookTransport, WebhookTransport};
pub use groups::Groups;
pub use scim::{DirectorySync, ScimMethod, ScimRequest, ScimResource, ScimResponse};
pub use users::Users;
