// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Core file-transfer engine: FTP/FTPS, SFTP (via an external helper
//! subprocess), HTTP(S), and a custom object-storage protocol, behind a
//! single façade that accepts commands and emits notifications (§1).
//!
//! The host application (UI, queue view, persistent settings, the
//! update checker's signature-verified manifest fetch) is out of scope;
//! this crate is the engine it drives.

pub mod cache;
pub mod collections;
pub mod commands;
pub mod config;
pub mod control_socket;
pub mod engine;
pub mod entry;
pub mod error;
pub mod eventloop;
pub mod failed_login;
pub mod globals;
pub mod logging;
pub mod operation;
pub mod oplock;
pub mod path;
pub mod protocols;
pub mod ratelimiter;
pub mod site;
pub mod socket_layers;
pub mod sync;
pub mod transfer_status;

#[cfg(feature = "update-checker")]
pub mod update_checker;

pub use commands::{Command, Notification};
pub use config::EngineOptions;
pub use engine::{Engine, EngineId, EngineRegistry};
pub use error::{Fail, FailResult, ReplyCode};
pub use site::{Protocol, Site};
