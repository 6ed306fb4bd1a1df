//! API translation between the OpenAI and Cohere chat formats.
//!
//! Converts requests, responses, and streaming events between the two
//! formats. All translation functions are pure (no I/O).

pub mod cohere_types;
pub mod openai_types;
pub mod request;
pub mod response;
pub mod streaming;
