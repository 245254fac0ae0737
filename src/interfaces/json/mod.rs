//! JSON Lines input of transaction messages and JSON envelopes for the
//! published queue messages.

pub mod queue_writer;
pub mod transaction_reader;
