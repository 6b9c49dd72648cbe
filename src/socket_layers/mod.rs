// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! The socket layer stack (§4.12, §5): rate-limiting and an optional
//! proxy handshake sit between a control socket's logical I/O and the
//! raw (or TLS-wrapped) transport. Layers are constructed outside-in —
//! rate-limit around the raw socket, proxy around that, TLS outermost —
//! and torn down in the reverse order, the same discipline the teacher
//! applies to its protocol stack's peer/background-task shutdown.

pub mod proxy;
pub mod rate_limit;

pub use proxy::{ProxyHandshake, ProxyKind, ProxyStep};
pub use rate_limit::RateLimitedStream;
