#![doc = include_str!("../README.md")]
#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

//! # Getting Started
//!
//! This crate implements the core OSDP (Open Supervised Device Protocol)
//! engine: a polled, half-duplex, serial-framed command/reply protocol
//! between a Control Panel (CP) and one or more Peripheral Devices (PDs),
//! with an optional authenticated and encrypted Secure Channel.
//!
//! Most functionality is reached through [`Context`], which owns either a
//! CP's view of N peripherals or a single PD's view of itself, and is
//! advanced by calling [`Context::refresh`] from an embedder's main loop.
//!
//! Serial I/O is supplied by the embedder through the [`channel::Channel`]
//! trait; this crate never touches a UART, USB device, or socket directly.

#[macro_use]
extern crate log;

#[macro_use]
mod macros;
#[macro_use]
pub mod error;

pub mod channel;
pub mod command;
pub mod config;
pub mod context;
pub mod cp;
pub mod event;
pub mod flags;
mod frame;
pub mod pd;
pub mod phy;
pub mod queue;
pub mod reply;
pub mod securechannel;
pub mod timing;
pub mod trs;

pub use crate::{
    channel::Channel,
    config::{Config, PdConfig},
    context::{Context, RoleHandles},
    error::*,
    event::{Event, EventCallback},
    pd::{CommandHandler, PdHandle, PdId, PdStatus},
};
