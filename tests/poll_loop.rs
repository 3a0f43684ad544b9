//! End-to-end tests driving a real `Server` over loopback TCP.

use std::io::{Read, Write};
use std::net::TcpStream as StdTcpStream;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use evmux::{Config, Event, Server};

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn drive(server: &mut Server, passes: usize) {
    for _ in 0..passes {
        server.poll(Duration::from_millis(200));
    }
}

#[test]
fn echoes_bytes_back_and_drains_to_zero_active() {
    init_tracing();
    let mut server = Server::new(
        None,
        Box::new(|conn, event| {
            if let Event::Recv = event {
                let data = conn.recv_data().to_vec();
                conn.consume_recv(data.len());
                conn.send(&data);
                conn.finish_sending();
            }
            0
        }),
        Config::default(),
    )
    .unwrap();

    let port = server.bind_to("0");
    assert_ne!(port, 0);

    let mut client = StdTcpStream::connect(("127.0.0.1", port)).unwrap();
    client.write_all(b"hello").unwrap();

    drive(&mut server, 10);

    let mut buf = [0u8; 5];
    client.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
    client.read_exact(&mut buf).unwrap();
    assert_eq!(&buf, b"hello");

    drive(&mut server, 5);
    assert_eq!(server.active_count(), 0);
}

#[test]
fn backpressured_send_buffer_drains_once_client_reads() {
    init_tracing();
    let sent_total = Arc::new(Mutex::new(0usize));
    let sent_total_cb = sent_total.clone();

    let mut server = Server::new(
        None,
        Box::new(move |conn, event| {
            if let Event::Accept = event {
                let chunk = vec![b'x'; 16 * 1024];
                let n = conn.send(&chunk);
                *sent_total_cb.lock().unwrap() += n;
            }
            0
        }),
        Config::default(),
    )
    .unwrap();

    let port = server.bind_to("0");
    let mut client = StdTcpStream::connect(("127.0.0.1", port)).unwrap();

    drive(&mut server, 3);
    assert!(*sent_total.lock().unwrap() > 0);

    let mut received = 0usize;
    let mut buf = [0u8; 4096];
    client.set_read_timeout(Some(Duration::from_millis(200))).unwrap();
    for _ in 0..50 {
        drive(&mut server, 1);
        match client.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => received += n,
            Err(_) => {}
        }
        if received >= *sent_total.lock().unwrap() {
            break;
        }
    }

    assert_eq!(received, *sent_total.lock().unwrap());
}

#[test]
fn peer_close_yields_one_accept_then_one_close_no_recv() {
    init_tracing();
    let saw_recv = Arc::new(Mutex::new(false));
    let accepts = Arc::new(Mutex::new(0));
    let closes = Arc::new(Mutex::new(0));

    let (saw_recv_cb, accepts_cb, closes_cb) = (saw_recv.clone(), accepts.clone(), closes.clone());

    let mut server = Server::new(
        None,
        Box::new(move |_conn, event| {
            match event {
                Event::Accept => *accepts_cb.lock().unwrap() += 1,
                Event::Recv => *saw_recv_cb.lock().unwrap() = true,
                Event::Close => *closes_cb.lock().unwrap() += 1,
                _ => {}
            }
            0
        }),
        Config::default(),
    )
    .unwrap();

    let port = server.bind_to("0");
    {
        let client = StdTcpStream::connect(("127.0.0.1", port)).unwrap();
        drop(client);
    }

    drive(&mut server, 5);

    assert_eq!(*accepts.lock().unwrap(), 1);
    assert_eq!(*closes.lock().unwrap(), 1);
    assert!(!*saw_recv.lock().unwrap());
}

#[test]
fn connect_to_closed_port_reports_nonzero_status_then_close() {
    init_tracing();
    let status = Arc::new(Mutex::new(None));
    let closed = Arc::new(Mutex::new(false));
    let recv_or_send_before_close = Arc::new(Mutex::new(false));

    let (status_cb, closed_cb, bad_order_cb) =
        (status.clone(), closed.clone(), recv_or_send_before_close.clone());

    let mut server = Server::new(
        None,
        Box::new(move |_conn, event| {
            match event {
                Event::Connect { status: s } => {
                    *status_cb.lock().unwrap() = Some(s);
                }
                Event::Recv | Event::Send => {
                    if !*closed_cb.lock().unwrap() {
                        *bad_order_cb.lock().unwrap() = true;
                    }
                }
                Event::Close => *closed_cb.lock().unwrap() = true,
                _ => {}
            }
            0
        }),
        Config::default(),
    )
    .unwrap();

    // Bind and immediately drop a listener to get a port nothing is
    // listening on anymore.
    let probe = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let dead_port = probe.local_addr().unwrap().port();
    drop(probe);

    let ok = server.connect("127.0.0.1", dead_port, false, None);
    assert!(ok);

    drive(&mut server, 20);

    assert!(status.lock().unwrap().is_some());
    assert_ne!(status.lock().unwrap().unwrap(), 0);
    assert!(*closed.lock().unwrap());
    assert!(!*recv_or_send_before_close.lock().unwrap());
}

#[test]
fn finished_sending_closes_after_drain_and_peer_sees_eof() {
    init_tracing();
    let mut server = Server::new(
        None,
        Box::new(|conn, event| {
            if let Event::Accept = event {
                conn.send(b"bye");
                conn.finish_sending();
            }
            0
        }),
        Config::default(),
    )
    .unwrap();

    let port = server.bind_to("0");
    let mut client = StdTcpStream::connect(("127.0.0.1", port)).unwrap();
    client.set_read_timeout(Some(Duration::from_secs(2))).unwrap();

    drive(&mut server, 5);

    let mut buf = Vec::new();
    client.read_to_end(&mut buf).unwrap();
    assert_eq!(buf, b"bye");
    assert_eq!(server.active_count(), 0);
}
