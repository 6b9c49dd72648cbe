// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Proxy handshakes (§4.12): HTTP CONNECT, SOCKS4, SOCKS5. Each is a
//! pure state machine — fed bytes, producing bytes to send — so it can
//! be driven by a socket layer or exercised in tests without a real
//! network connection.

use std::net::IpAddr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyKind {
    Http,
    Socks4,
    Socks5,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProxyStep {
    /// More response bytes are needed before the handshake can progress.
    NeedMoreData,
    /// Send these bytes, then keep feeding replies.
    Send(Vec<u8>),
    /// Handshake complete; the layer becomes transparent.
    Done,
    Failed(String),
}

const HTTP_CONNECT_RESPONSE_LIMIT: usize = 2048;

pub struct ProxyHandshake {
    kind: ProxyKind,
    target_host: String,
    target_port: u16,
    credentials: Option<(String, String)>,
    state: State,
    buffer: Vec<u8>,
}

enum State {
    NotStarted,
    HttpAwaitingResponse,
    Socks4AwaitingReply,
    Socks5AwaitingMethod,
    Socks5AwaitingAuthReply,
    Socks5AwaitingConnectReply,
    Done,
    Failed,
}

impl ProxyHandshake {
    pub fn new(
        kind: ProxyKind,
        target_host: String,
        target_port: u16,
        credentials: Option<(String, String)>,
    ) -> Self {
        ProxyHandshake {
            kind,
            target_host,
            target_port,
            credentials,
            state: State::NotStarted,
            buffer: Vec::new(),
        }
    }

    /// The first bytes to send to initiate the handshake.
    pub fn start(&mut self) -> Vec<u8> {
        match self.kind {
            ProxyKind::Http => {
                self.state = State::HttpAwaitingResponse;
                let mut req = format!(
                    "CONNECT {host}:{port} HTTP/1.1\r\nHost: {host}:{port}\r\n",
                    host = self.target_host,
                    port = self.target_port
                );
                if let Some((user, pass)) = &self.credentials {
                    let token = base64::encode(format!("{}:{}", user, pass));
                    req.push_str(&format!("Authorization: Basic {}\r\n", token));
                }
                req.push_str("User-Agent: fz-transfer-engine\r\n\r\n");
                req.into_bytes()
            },
            ProxyKind::Socks4 => {
                self.state = State::Socks4AwaitingReply;
                self.socks4_request()
            },
            ProxyKind::Socks5 => {
                self.state = State::Socks5AwaitingMethod;
                let has_auth = self.credentials.is_some();
                let methods: &[u8] = if has_auth { &[0x00, 0x02] } else { &[0x00] };
                let mut req = vec![0x05, methods.len() as u8];
                req.extend_from_slice(methods);
                req
            },
        }
    }

    fn socks4_request(&self) -> Vec<u8> {
        let ip = match self.target_host.parse::<IpAddr>() {
            Ok(IpAddr::V4(v4)) => v4,
            _ => std::net::Ipv4Addr::new(0, 0, 0, 1),
        };
        let mut req = vec![0x04, 0x01];
        req.extend_from_slice(&self.target_port.to_be_bytes());
        req.extend_from_slice(&ip.octets());
        req.push(0x00);
        req
    }

    /// Feeds newly-arrived response bytes and advances the state machine.
    pub fn feed(&mut self, data: &[u8]) -> ProxyStep {
        self.buffer.extend_from_slice(data);
        match self.state {
            State::HttpAwaitingResponse => self.feed_http(),
            State::Socks4AwaitingReply => self.feed_socks4(),
            State::Socks5AwaitingMethod => self.feed_socks5_method(),
            State::Socks5AwaitingAuthReply => self.feed_socks5_auth(),
            State::Socks5AwaitingConnectReply => self.feed_socks5_connect(),
            State::NotStarted | State::Done | State::Failed => {
                ProxyStep::Failed("handshake not in progress".to_string())
            },
        }
    }

    fn fail(&mut self, msg: impl Into<String>) -> ProxyStep {
        self.state = State::Failed;
        ProxyStep::Failed(msg.into())
    }

    fn feed_http(&mut self) -> ProxyStep {
        if self.buffer.len() > HTTP_CONNECT_RESPONSE_LIMIT {
            return self.fail("HTTP CONNECT response exceeded 2048 bytes without terminator");
        }
        let Some(end) = find_subslice(&self.buffer, b"\r\n\r\n") else {
            return ProxyStep::NeedMoreData;
        };
        let header = String::from_utf8_lossy(&self.buffer[..end]).to_string();
        let status_line = header.lines().next().unwrap_or_default();
        let ok = status_line
            .splitn(3, ' ')
            .nth(1)
            .map(|code| code.starts_with('2') && code.len() == 3)
            .unwrap_or(false);
        if ok && status_line.starts_with("HTTP/1.") {
            self.state = State::Done;
            ProxyStep::Done
        } else {
            self.fail(format!("proxy CONNECT rejected: {}", status_line))
        }
    }

    fn feed_socks4(&mut self) -> ProxyStep {
        if self.buffer.len() < 8 {
            return ProxyStep::NeedMoreData;
        }
        let reply = self.buffer[..8].to_vec();
        self.buffer.drain(..8);
        if reply[1] == 0x5A {
            self.state = State::Done;
            ProxyStep::Done
        } else {
            self.fail(format!("SOCKS4 request rejected, status 0x{:02x}", reply[1]))
        }
    }

    fn feed_socks5_method(&mut self) -> ProxyStep {
        if self.buffer.len() < 2 {
            return ProxyStep::NeedMoreData;
        }
        let method = self.buffer[1];
        self.buffer.drain(..2);
        match method {
            0x00 => {
                self.state = State::Socks5AwaitingConnectReply;
                ProxyStep::Send(self.socks5_connect_request())
            },
            0x02 => {
                let (user, pass) = self.credentials.clone().unwrap_or_default();
                let mut req = vec![0x01, user.len() as u8];
                req.extend_from_slice(user.as_bytes());
                req.push(pass.len() as u8);
                req.extend_from_slice(pass.as_bytes());
                self.state = State::Socks5AwaitingAuthReply;
                ProxyStep::Send(req)
            },
            0xFF => self.fail("SOCKS5 server rejected all authentication methods"),
            other => self.fail(format!("SOCKS5 server selected unsupported method 0x{:02x}", other)),
        }
    }

    fn feed_socks5_auth(&mut self) -> ProxyStep {
        if self.buffer.len() < 2 {
            return ProxyStep::NeedMoreData;
        }
        let status = self.buffer[1];
        self.buffer.drain(..2);
        if status != 0x00 {
            return self.fail("SOCKS5 username/password authentication failed");
        }
        self.state = State::Socks5AwaitingConnectReply;
        ProxyStep::Send(self.socks5_connect_request())
    }

    fn socks5_connect_request(&self) -> Vec<u8> {
        let mut req = vec![0x05, 0x01, 0x00];
        match self.target_host.parse::<IpAddr>() {
            Ok(IpAddr::V4(v4)) => {
                req.push(0x01);
                req.extend_from_slice(&v4.octets());
            },
            Ok(IpAddr::V6(v6)) => {
                req.push(0x04);
                req.extend_from_slice(&v6.octets());
            },
            Err(_) => {
                req.push(0x03);
                req.push(self.target_host.len() as u8);
                req.extend_from_slice(self.target_host.as_bytes());
            },
        }
        req.extend_from_slice(&self.target_port.to_be_bytes());
        req
    }

    fn feed_socks5_connect(&mut self) -> ProxyStep {
        if self.buffer.len() < 5 {
            return ProxyStep::NeedMoreData;
        }
        let status = self.buffer[1];
        let atyp = self.buffer[3];
        let addr_len = match atyp {
            0x01 => 4,
            0x04 => 16,
            0x03 => self.buffer[4] as usize + 1,
            _ => return self.fail(format!("SOCKS5 reply used unknown address type 0x{:02x}", atyp)),
        };
        let total = 4 + addr_len + 2;
        if self.buffer.len() < total {
            return ProxyStep::NeedMoreData;
        }
        self.buffer.drain(..total);
        if status == 0x00 {
            self.state = State::Done;
            ProxyStep::Done
        } else {
            self.fail(format!("SOCKS5 CONNECT rejected, status 0x{:02x}", status))
        }
    }
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_connect_success() {
        let mut hs = ProxyHandshake::new(ProxyKind::Http, "example.com".into(), 443, None);
        let req = hs.start();
        assert!(String::from_utf8_lossy(&req).starts_with("CONNECT example.com:443"));
        let step = hs.feed(b"HTTP/1.1 200 Connection Established\r\n\r\n");
        assert_eq!(step, ProxyStep::Done);
    }

    #[test]
    fn http_connect_rejects_non_2xx() {
        let mut hs = ProxyHandshake::new(ProxyKind::Http, "example.com".into(), 443, None);
        hs.start();
        let step = hs.feed(b"HTTP/1.1 407 Proxy Authentication Required\r\n\r\n");
        assert!(matches!(step, ProxyStep::Failed(_)));
    }

    #[test]
    fn http_connect_handles_split_reads() {
        let mut hs = ProxyHandshake::new(ProxyKind::Http, "example.com".into(), 443, None);
        hs.start();
        assert_eq!(hs.feed(b"HTTP/1.1 200"), ProxyStep::NeedMoreData);
        assert_eq!(hs.feed(b" OK\r\n\r\n"), ProxyStep::Done);
    }

    #[test]
    fn socks4_success_and_failure() {
        let mut hs = ProxyHandshake::new(ProxyKind::Socks4, "1.2.3.4".into(), 80, None);
        let req = hs.start();
        assert_eq!(req.len(), 9);
        assert_eq!(hs.feed(&[0, 0x5A, 0, 0, 0, 0, 0, 0]), ProxyStep::Done);

        let mut hs = ProxyHandshake::new(ProxyKind::Socks4, "1.2.3.4".into(), 80, None);
        hs.start();
        assert!(matches!(hs.feed(&[0, 0x5B, 0, 0, 0, 0, 0, 0]), ProxyStep::Failed(_)));
    }

    #[test]
    fn socks5_no_auth_connect_flow() {
        let mut hs = ProxyHandshake::new(ProxyKind::Socks5, "1.2.3.4".into(), 21, None);
        let greeting = hs.start();
        assert_eq!(greeting, vec![0x05, 0x01, 0x00]);

        let step = hs.feed(&[0x05, 0x00]);
        let ProxyStep::Send(connect_req) = step else { panic!("expected connect request") };
        assert_eq!(connect_req[..4], [0x05, 0x01, 0x00, 0x01]);

        let reply = vec![0x05, 0x00, 0x00, 0x01, 0, 0, 0, 0, 0, 80];
        assert_eq!(hs.feed(&reply), ProxyStep::Done);
    }

    #[test]
    fn socks5_username_password_subnegotiation() {
        let mut hs = ProxyHandshake::new(
            ProxyKind::Socks5,
            "proxy.example".into(),
            1080,
            Some(("alice".into(), "hunter2".into())),
        );
        let greeting = hs.start();
        assert_eq!(greeting, vec![0x05, 0x02, 0x00, 0x02]);

        let step = hs.feed(&[0x05, 0x02]);
        let ProxyStep::Send(auth_req) = step else { panic!("expected auth sub-negotiation") };
        assert_eq!(auth_req[0], 0x01);

        let step = hs.feed(&[0x01, 0x00]);
        assert!(matches!(step, ProxyStep::Send(_)));
    }

    #[test]
    fn socks5_domain_name_target_is_length_prefixed() {
        let mut hs = ProxyHandshake::new(ProxyKind::Socks5, "example.com".into(), 443, None);
        hs.start();
        let ProxyStep::Send(connect_req) = hs.feed(&[0x05, 0x00]) else { panic!() };
        assert_eq!(connect_req[3], 0x03);
        assert_eq!(connect_req[4], "example.com".len() as u8);
    }
}
