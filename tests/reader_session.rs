//! End-to-end exercises over real loopback sockets: random-payload
//! codec round-trips, frame reassembly from adversarial segmenting,
//! and the session-lock serialization contract.

use std::io::{Read, Write};
use std::net::TcpListener;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rand::Rng;

use cl7206::client::ReaderSession;
use cl7206::deframer::Deframer;
use cl7206::frame::{Decoded, Frame, decode_one};

#[test]
fn random_payload_roundtrips() {
    let mut rng = rand::rng();
    for _ in 0..200 {
        let len = rng.random_range(0..=1023);
        let payload: Vec<u8> = (0..len).map(|_| rng.random()).collect();
        let cmd = rng.random_range(0..=0x1Fu8); // keep clear of the bus flag
        let sub: u8 = rng.random();
        let frame = Frame::new(cmd, sub, payload).unwrap();
        let wire = frame.encode();
        match decode_one(&wire) {
            Decoded::Frame(got, consumed) => {
                assert_eq!(consumed, wire.len());
                assert_eq!(got, frame);
            }
            other => panic!("roundtrip failed: {other:?}"),
        }
    }
}

#[test]
fn reassembly_from_random_segmenting() {
    let mut rng = rand::rng();
    // A realistic burst: three tag notifications and a response,
    // with garbage in front.
    let frames: Vec<Frame> = vec![
        Frame::new(0x12, 0x30, vec![0x08, 0x00, 0xAB, 0xCD, 0x01, 0x00, 0x00]).unwrap(),
        Frame::new(0x12, 0x00, vec![0x08, 0x00, 0x11, 0x22, 0x02, 0x40, 0x41]).unwrap(),
        Frame::new(0x01, 0x05, vec![192, 168, 1, 116, 255, 255, 255, 0, 192, 168, 1, 1])
            .unwrap(),
        Frame::new(0x12, 0x20, vec![0x08, 0x00, 0x99, 0x88]).unwrap(),
    ];
    let mut wire = vec![0x13, 0x37, 0x00]; // leading garbage, no sync byte
    for f in &frames {
        wire.extend_from_slice(&f.encode());
    }

    for _ in 0..50 {
        let mut deframer = Deframer::new();
        let mut got = Vec::new();
        let mut pos = 0;
        while pos < wire.len() {
            let n = rng.random_range(1..=9).min(wire.len() - pos);
            deframer.push(&wire[pos..pos + n]);
            pos += n;
            while let Some(f) = deframer.next_frame() {
                got.push(f);
            }
        }
        assert_eq!(got, frames);
    }
}

/// Fake reader that checks every request arrives as one contiguous,
/// well-formed frame; interleaved writes from two clients would
/// break the frame boundary check.
fn strict_echo_reader() -> (std::net::SocketAddr, std::thread::JoinHandle<usize>) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = std::thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        let mut served = 0usize;
        let mut buf = Vec::new();
        let mut chunk = [0u8; 256];
        loop {
            let n = match stream.read(&mut chunk) {
                Ok(0) | Err(_) => break,
                Ok(n) => n,
            };
            buf.extend_from_slice(&chunk[..n]);
            loop {
                match decode_one(&buf) {
                    Decoded::Frame(frame, consumed) => {
                        // A request must start at the very beginning
                        // of the buffer: no stray bytes between
                        // frames.
                        assert_eq!(
                            consumed,
                            frame.encode().len(),
                            "bytes interleaved between requests"
                        );
                        buf.drain(..consumed);
                        // Answer with a network-config payload.
                        let resp = Frame::new(
                            frame.cmd,
                            frame.sub,
                            vec![10, 0, 0, 1, 255, 0, 0, 0, 10, 0, 0, 254],
                        )
                        .unwrap();
                        stream.write_all(&resp.encode()).unwrap();
                        served += 1;
                    }
                    Decoded::NeedMore(_) => break,
                    Decoded::Resync(_) => panic!("fake reader got a corrupt request"),
                }
            }
        }
        served
    });
    (addr, handle)
}

#[test]
fn session_lock_serializes_wire_traffic() {
    let (addr, reader) = strict_echo_reader();
    let session = Arc::new(Mutex::new(
        ReaderSession::connect(&addr.ip().to_string(), addr.port(), None).unwrap(),
    ));

    let mut workers = Vec::new();
    for _ in 0..4 {
        let session = Arc::clone(&session);
        workers.push(std::thread::spawn(move || {
            let mut results = Vec::new();
            for _ in 0..10 {
                let net = session.lock().unwrap().network().unwrap();
                results.push(net);
            }
            results
        }));
    }
    let mut all = Vec::new();
    for w in workers {
        all.extend(w.join().unwrap());
    }
    // Every concurrent caller decoded the same parsed result.
    assert_eq!(all.len(), 40);
    for net in &all {
        assert_eq!(net.ip.octets(), [10, 0, 0, 1]);
    }
    drop(session); // close the socket so the fake reader exits
    assert_eq!(reader.join().unwrap(), 40);
}

#[test]
fn dribbled_response_still_decodes() {
    // One valid response delivered a byte at a time, after noise.
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let h = std::thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        let req = Frame::new(0x01, 0x06, vec![]).unwrap().encode();
        let mut got = vec![0u8; req.len()];
        stream.read_exact(&mut got).unwrap();
        let mut bytes = vec![0x42]; // noise before the sync
        bytes.extend_from_slice(
            &Frame::new(0x01, 0x06, vec![0, 1, 2, 3, 4, 5])
                .unwrap()
                .encode(),
        );
        for b in bytes {
            stream.write_all(&[b]).unwrap();
            std::thread::sleep(Duration::from_millis(2));
        }
        std::thread::sleep(Duration::from_millis(50));
    });
    let mut session = ReaderSession::connect(&addr.ip().to_string(), addr.port(), None).unwrap();
    let mac = session.mac().unwrap();
    assert_eq!(mac.to_string(), "00:01:02:03:04:05");
    h.join().unwrap();
}
