//! Optional facilities built on top of the core model.

pub mod history_writer;
