// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Manual smoke test for the façade (§1 Expansion): connects to a tiny
//! loopback FTP stub, negotiates a PASV data channel, and downloads a
//! few bytes, printing each engine notification as it arrives. Run with
//! `cargo run --example loopback_demo`.

use crossbeam_channel::unbounded;
use fz_engine::engine::{Engine, EngineRegistry};
use fz_engine::protocols::ftp::transfer::parse_pasv;
use fz_engine::protocols::ftp::ReplyParser;
use fz_engine::site::{Protocol, Site};
use fz_engine::Command;
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::thread;

/// A minimal FTP server: one welcome banner, one `PASV` reply pointing
/// at a throwaway data listener, then a fixed payload on that data
/// connection. Just enough wire behavior to exercise the client side.
fn spawn_stub() -> u16 {
    let control = TcpListener::bind("127.0.0.1:0").expect("bind control listener");
    let control_port = control.local_addr().unwrap().port();

    thread::spawn(move || {
        let (mut client, _) = control.accept().expect("accept control connection");
        client.write_all(b"220 loopback stub ready\r\n").unwrap();

        let mut line = [0u8; 256];
        let n = client.read(&mut line).unwrap();
        assert!(String::from_utf8_lossy(&line[..n]).starts_with("PASV"));

        let data = TcpListener::bind("127.0.0.1:0").expect("bind data listener");
        let data_port = data.local_addr().unwrap().port();
        let (hi, lo) = (data_port / 256, data_port % 256);
        client
            .write_all(format!("227 Entering Passive Mode (127,0,0,1,{},{})\r\n", hi, lo).as_bytes())
            .unwrap();

        let (mut data_conn, _) = data.accept().expect("accept data connection");
        data_conn.write_all(b"abc").unwrap();
        drop(data_conn);

        client.write_all(b"226 Transfer complete\r\n").unwrap();
    });

    control_port
}

fn main() {
    let port = spawn_stub();

    let (tx, rx) = unbounded();
    let mut registry = EngineRegistry::new();
    let id = registry.register(unbounded().0);
    let mut engine = Engine::new(id, tx);

    let site = Site::new("127.0.0.1", port, Protocol::Ftp);
    engine
        .submit(Command::Connect { site: site.clone() })
        .expect("connect is accepted while disconnected");

    let mut socket = TcpStream::connect(("127.0.0.1", port)).expect("dial loopback stub");
    let mut parser = ReplyParser::new();
    let mut buf = [0u8; 512];

    let welcome = read_one_reply(&mut socket, &mut parser, &mut buf);
    println!("<- {} {}", welcome.code, welcome.text);
    engine.mark_connected();
    while let Ok(note) = rx.try_recv() {
        println!("notification: {:?}", note);
    }

    socket.write_all(b"PASV\r\n").unwrap();
    let pasv_reply = read_one_reply(&mut socket, &mut parser, &mut buf);
    println!("<- {} {}", pasv_reply.code, pasv_reply.text);
    let data_addr = parse_pasv(&pasv_reply.text).expect("parse PASV reply");

    let mut data_conn = TcpStream::connect(data_addr).expect("dial data channel");
    let mut payload = Vec::new();
    data_conn.read_to_end(&mut payload).unwrap();
    println!("downloaded {} bytes: {:?}", payload.len(), payload);

    let complete = read_one_reply(&mut socket, &mut parser, &mut buf);
    println!("<- {} {}", complete.code, complete.text);
}

fn read_one_reply(
    socket: &mut TcpStream,
    parser: &mut ReplyParser,
    buf: &mut [u8],
) -> fz_engine::protocols::ftp::FtpReply {
    loop {
        let n = socket.read(buf).expect("read reply bytes");
        let replies = parser.feed(&buf[..n]).expect("well-formed reply");
        if let Some(reply) = replies.into_iter().next() {
            return reply;
        }
    }
}
