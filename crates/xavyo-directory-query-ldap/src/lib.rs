//! LDAP / Active Directory adapter for xavyo-directory-query
//!
//! Executes built LDAP searches: connects (LDAPS or LDAP with optional
//! StartTLS), simple-binds with the resolved credentials, runs a paged
//! search and maps entries to JSON rows. `objectGUID` and `objectSid` are
//! decoded to their canonical string forms; other binary values are base64.

mod adapter;
mod config;
mod entry;

pub use adapter::LdapAdapter;
pub use config::{LdapAdapterConfig, DEFAULT_PAGE_SIZE};
pub use entry::{format_guid, format_sid};
