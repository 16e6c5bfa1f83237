#![forbid(unsafe_code)]

//! Web proxy that lists the downloadable variants of a YouTube video and
//! streams a chosen one back as a file.
//!
//! The interesting part is [`session::DownloadManager`]: it validates the
//! request, drives the external extraction engine, and hands the transport
//! an [`session::ArtifactStream`] that owns the temporary artifact, so the
//! storage is reclaimed whether the transfer finishes or not.

pub mod api;
pub mod artifact;
pub mod catalog;
pub mod config;
pub mod engine;
pub mod error;
pub mod extractor;
pub mod security;
pub mod session;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod validate;
