//! The relay pipeline: resolve the target, fetch it, classify the body and
//! assemble the response.

pub mod classify;
pub mod headers;
pub mod policy;
pub mod recursion;
pub mod response;
pub mod target;
pub mod upstream;
