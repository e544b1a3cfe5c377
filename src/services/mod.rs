//! Request-independent logic: conditional retrieval, batch mutation, bundle
//! assembly and search, plus the service facade that owns session lifecycle.

pub mod batch;
pub mod bundle;
pub mod conditional;
pub mod datastream_service;
pub mod search;
