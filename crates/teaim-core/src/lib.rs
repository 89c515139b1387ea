//! TEAIM Core Types
//!
//! This crate provides the types shared by every TEAIM crate:
//! - Core error type and `Result` alias
//! - Request identifiers propagated through `x-request-id`

pub mod error;
pub mod request_id;

pub use error::{Error, Result};
pub use request_id::{REQUEST_ID_HEADER, RequestId};
