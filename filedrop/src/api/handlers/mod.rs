//! HTTP request handlers.
//!
//! - [`uploads`]: `POST /upload`, storing attachments and echoing the message
//!
//! Handlers return [`crate::errors::Result`], whose error type converts into the matching HTTP
//! status code.

pub mod uploads;
