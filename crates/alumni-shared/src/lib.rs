//! # alumni-shared
//!
//! Types shared by every crate of the alumni portal messaging service:
//! identifiers, the client/server event protocol, access tokens issued by the
//! auth collaborator, and protocol constants.

pub mod auth;
pub mod constants;
pub mod error;
pub mod protocol;
pub mod types;
