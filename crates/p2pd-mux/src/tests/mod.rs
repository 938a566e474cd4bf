//! Unit and behavioural tests for the multiplexer.

mod support;
mod unit;
