// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! The four wire protocols the engine speaks, each behind its own
//! module: FTP(S) (§4.6) driven directly over a socket, SFTP (§4.8) and
//! object storage (§4.9) driven through an external helper subprocess's
//! line protocol, and HTTP(S) (§4.7) driven directly over a socket like
//! FTP. [`crate::site::Protocol`] tags which one a given site uses.

pub mod ftp;
pub mod http;
pub mod object_storage;
pub mod sftp;
