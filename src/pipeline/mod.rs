//! Data passed between the audio front end and the session.

pub mod messages;
