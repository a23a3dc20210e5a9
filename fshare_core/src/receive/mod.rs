//! Receiver side: connect, authenticate, take the payload, write it, acknowledge

mod client;
pub mod storage;

pub use client::{
    NoPrompt, PasswordPrompt, ReceiveOptions, ReceiveOutcome, ReceiveTarget, receive,
};
