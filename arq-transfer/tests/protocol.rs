//! Protocol behaviour against a scripted peer.
//!
//! One side of each exchange is a real endpoint; the other is driven by hand
//! through the raw [`Socket`] and [`Frame`] API so the test controls exactly
//! what goes on the wire.

use std::net::SocketAddr;
use std::time::Duration;

use arq_transfer::fault::{flip_payload_bit, NoFaults};
use arq_transfer::frame::tokens;
use arq_transfer::progress::NoProgress;
use arq_transfer::socket::{Datagram, Socket, MAX_DATAGRAM};
use arq_transfer::state::{ProviderState, RequesterState};
use arq_transfer::{
    ArqTimings, EndpointId, Frame, Provider, Requester, RequesterConfig, Seq, Source,
    TransferError,
};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn timings(poll_ms: u64) -> ArqTimings {
    ArqTimings {
        poll_timeout: Duration::from_millis(poll_ms),
        max_failures: 10,
    }
}

async fn loopback() -> Socket {
    Socket::bind("127.0.0.1:0".parse().unwrap())
        .await
        .expect("bind loopback socket")
}

/// Receive one datagram or fail the test after two seconds.
async fn recv(socket: &Socket) -> Datagram {
    tokio::time::timeout(Duration::from_secs(2), socket.recv_from(MAX_DATAGRAM))
        .await
        .expect("timed out waiting for datagram")
        .expect("recv failed")
}

async fn recv_frame(socket: &Socket) -> (Frame, Vec<u8>, SocketAddr) {
    let d = recv(socket).await;
    (d.frame().expect("intact frame"), d.bytes, d.from)
}

async fn send(socket: &Socket, frame: Frame, to: SocketAddr) {
    socket.send_frame(&frame, to).await.expect("send failed");
}

fn requester_config(server: SocketAddr, dir: &std::path::Path, t: ArqTimings) -> RequesterConfig {
    let mut config = RequesterConfig::new(server);
    config.output_dir = dir.to_path_buf();
    config.timings = t;
    config
}

// ---------------------------------------------------------------------------
// Requester side
// ---------------------------------------------------------------------------

/// The provider completes the handshake and then disappears.  The requester
/// keeps re-acknowledging, gives up after the failure budget, and writes
/// nothing to disk.
#[tokio::test]
async fn requester_gives_up_on_silent_provider() {
    let fake = loopback().await;
    let addr = fake.local_addr;
    let provider_id = EndpointId::new("fakeprovider");

    let script = tokio::spawn(async move {
        let (request, _, client) = recv_frame(&fake).await;
        assert!(request.is(tokens::REQUEST_DATA));
        let peer = request.src;

        send(&fake, Frame::control(peer, provider_id, tokens::REQUEST_ACCEPTED), client).await;
        send(&fake, Frame::control(peer, provider_id, b"135".to_vec()), client).await;
        let (ok, _, _) = recv_frame(&fake).await;
        assert!(ok.is(tokens::OK));
        assert_eq!(ok.dest, provider_id);

        send(&fake, Frame::control(peer, provider_id, b"3".to_vec()), client).await;
        send(&fake, Frame::control(peer, provider_id, b"gone.bin".to_vec()), client).await;
        let (ready, _, _) = recv_frame(&fake).await;
        assert!(ready.is(tokens::READY));

        // Go silent and count the re-acknowledgements.
        let mut reacks = 0;
        while let Ok(Some(d)) = fake.poll_recv(Duration::from_millis(500)).await {
            let frame = d.frame().expect("intact ACK");
            assert_eq!(frame.acked_seq(), Some(Seq::Unsequenced));
            reacks += 1;
        }
        reacks
    });

    let dir = tempfile::tempdir().unwrap();
    let config = requester_config(addr, dir.path(), timings(20));
    let mut req = Requester::connect(config).await.unwrap();
    let result = tokio::time::timeout(Duration::from_secs(5), req.run(NoProgress))
        .await
        .expect("requester hung");

    assert!(matches!(result, Err(TransferError::NoResponse { attempts: 11 })));
    assert_eq!(req.state(), RequesterState::Failed);
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    assert_eq!(script.await.unwrap(), 11);
}

/// Anything other than `request_accepted` ends the session immediately.
#[tokio::test]
async fn requester_reports_rejection() {
    let fake = loopback().await;
    let addr = fake.local_addr;

    tokio::spawn(async move {
        let (request, _, client) = recv_frame(&fake).await;
        let busy = Frame::control(request.src, EndpointId::new("busy"), b"busy".to_vec());
        send(&fake, busy, client).await;
    });

    let dir = tempfile::tempdir().unwrap();
    let mut req = Requester::connect(requester_config(addr, dir.path(), timings(200)))
        .await
        .unwrap();
    match req.fetch(NoProgress).await {
        Err(TransferError::Rejected { payload }) => assert_eq!(payload, "busy"),
        other => panic!("expected rejection, got {other:?}"),
    }
}

/// A corrupted metadata frame is fatal; there is no retry during the handshake.
#[tokio::test]
async fn requester_aborts_on_corrupted_metadata() {
    let fake = loopback().await;
    let addr = fake.local_addr;

    tokio::spawn(async move {
        let (request, _, client) = recv_frame(&fake).await;
        let me = EndpointId::new("fakeprovider");
        send(&fake, Frame::control(request.src, me, tokens::REQUEST_ACCEPTED), client).await;
        let size = Frame::control(request.src, me, b"135".to_vec()).encode().unwrap();
        fake.send_to(&flip_payload_bit(&size, 3), client).await.unwrap();
    });

    let dir = tempfile::tempdir().unwrap();
    let mut req = Requester::connect(requester_config(addr, dir.path(), timings(200)))
        .await
        .unwrap();
    let result = req.fetch(NoProgress).await;
    assert!(matches!(result, Err(TransferError::Corrupted { stage: "frame size" })));
    assert_eq!(req.state(), RequesterState::Failed);
}

/// The requester re-acknowledges a corrupted data frame and ignores an
/// out-of-order one; only the in-order copy is kept.
#[tokio::test]
async fn requester_reacks_corruption_and_ignores_unexpected() {
    let fake = loopback().await;
    let addr = fake.local_addr;
    let me = EndpointId::new("fakeprovider");

    let script = tokio::spawn(async move {
        let (request, _, client) = recv_frame(&fake).await;
        let peer = request.src;
        send(&fake, Frame::control(peer, me, tokens::REQUEST_ACCEPTED), client).await;
        send(&fake, Frame::control(peer, me, b"39".to_vec()), client).await;
        recv_frame(&fake).await; // OK
        send(&fake, Frame::control(peer, me, b"1".to_vec()), client).await;
        send(&fake, Frame::control(peer, me, b"x.txt".to_vec()), client).await;
        recv_frame(&fake).await; // ready

        let data = Frame::new(peer, me, Seq::num(0), b"abcd".to_vec()).encode().unwrap();
        fake.send_to(&flip_payload_bit(&data, 9), client).await.unwrap();
        let (reack, _, _) = recv_frame(&fake).await;
        assert_eq!(reack.acked_seq(), Some(Seq::Unsequenced));

        // Wrong sequence number: no reply at all.
        send(&fake, Frame::new(peer, me, Seq::num(4), b"zzzz".to_vec()), client).await;
        fake.send_to(&data, client).await.unwrap();
        let (ack, _, _) = recv_frame(&fake).await;
        assert_eq!(ack.acked_seq(), Some(Seq::num(0)));
        assert_eq!(ack.seq, Seq::num(0));
    });

    let dir = tempfile::tempdir().unwrap();
    let mut req = Requester::connect(requester_config(addr, dir.path(), timings(1_000)))
        .await
        .unwrap();
    let download = req.fetch(NoProgress).await.unwrap();
    assert_eq!(download.data, b"abcd");
    assert_eq!(download.corrupted_frames, 1);
    assert_eq!(download.filename, "x.txt");
    script.await.unwrap();
}

// ---------------------------------------------------------------------------
// Provider side
// ---------------------------------------------------------------------------

/// Drive a real provider through the handshake from a scripted requester.
/// Returns the provider's address as seen by the requester and the
/// announced frame count.
async fn handshake(fake: &Socket, provider: SocketAddr, me: EndpointId) -> (EndpointId, u64) {
    send(fake, Frame::control(EndpointId::unknown(), me, tokens::REQUEST_DATA), provider).await;
    let (accepted, _, _) = recv_frame(fake).await;
    assert!(accepted.is(tokens::REQUEST_ACCEPTED));
    assert_eq!(accepted.dest, me);
    let (size, _, _) = recv_frame(fake).await;
    assert_eq!(size.payload_text(), "135");
    let provider_id = size.src;

    send(fake, Frame::control(provider_id, me, tokens::OK), provider).await;
    let (count, _, _) = recv_frame(fake).await;
    let (name, _, _) = recv_frame(fake).await;
    assert_eq!(name.payload_text(), "sample.bin");
    send(fake, Frame::control(provider_id, me, tokens::READY), provider).await;

    (provider_id, count.payload_text().parse().unwrap())
}

async fn provider(data: Vec<u8>, t: ArqTimings) -> Provider<NoFaults> {
    Provider::new(loopback().await, Source::new("sample.bin", data), 100, NoFaults)
        .expect("valid chunk size")
        .with_timings(t)
}

/// A predecessor ACK triggers an immediate, identical retransmission rather
/// than waiting out the poll timeout.
#[tokio::test]
async fn duplicate_ack_triggers_immediate_resend() {
    let mut provider = provider(vec![7u8; 250], timings(5_000)).await;
    let addr = provider.local_addr();
    let session = tokio::spawn(async move {
        let client = provider.accept().await.unwrap();
        let report = provider.session(client, NoProgress).await;
        (report, provider.state())
    });

    let fake = loopback().await;
    let me = EndpointId::new("fakeclient");
    let (provider_id, total) = handshake(&fake, addr, me).await;
    assert_eq!(total, 3);

    let (f0, _, _) = recv_frame(&fake).await;
    assert_eq!(f0.seq, Seq::num(0));
    send(&fake, Frame::ack(provider_id, me, Seq::num(0)), addr).await;

    let (f1, first, _) = recv_frame(&fake).await;
    assert_eq!(f1.seq, Seq::num(1));
    send(&fake, Frame::ack(provider_id, me, Seq::num(0)), addr).await;

    // Well inside the 5 s window, so this is the duplicate path.
    let again = tokio::time::timeout(Duration::from_secs(1), fake.recv_from(MAX_DATAGRAM))
        .await
        .expect("no immediate resend")
        .unwrap();
    assert_eq!(again.bytes, first);

    send(&fake, Frame::ack(provider_id, me, Seq::num(1)), addr).await;
    let (f2, _, _) = recv_frame(&fake).await;
    assert_eq!(f2.seq, Seq::num(2));
    assert_eq!(f2.payload.len(), 50);
    send(&fake, Frame::ack(provider_id, me, Seq::num(2)), addr).await;

    let (report, state) = tokio::time::timeout(Duration::from_secs(2), session)
        .await
        .unwrap()
        .unwrap();
    let report = report.unwrap();
    assert_eq!(report.frames, 3);
    assert_eq!(report.duplicate_acks, 1);
    assert_eq!(state, ProviderState::Complete);
}

/// A requester that vanishes mid-transfer aborts the session, and the
/// provider goes back to accepting new requests.
#[tokio::test]
async fn provider_abandons_silent_requester_and_accepts_again() {
    let mut provider = provider(vec![1u8; 250], timings(20)).await;
    let addr = provider.local_addr();
    let server = tokio::spawn(async move {
        let client = provider.accept().await.unwrap();
        let first = provider.session(client, NoProgress).await;
        let aborted = provider.state();
        let client = provider.accept().await.unwrap();
        let second = provider.session(client, NoProgress).await;
        (first, aborted, second)
    });

    let fake = loopback().await;
    handshake(&fake, addr, EndpointId::new("vanishing")).await;
    let (f0, _, _) = recv_frame(&fake).await;
    assert_eq!(f0.seq, Seq::num(0));
    drop(fake);

    let dir = tempfile::tempdir().unwrap();
    let config = requester_config(addr, dir.path(), timings(200));
    let mut req = Requester::connect(config).await.unwrap();

    // Give the provider time to exhaust its budget before the next request.
    tokio::time::sleep(Duration::from_millis(600)).await;
    let download = tokio::time::timeout(Duration::from_secs(10), req.fetch(NoProgress))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(download.data, vec![1u8; 250]);

    let (first, aborted, second) = server.await.unwrap();
    assert!(matches!(first, Err(TransferError::NoResponse { .. })));
    assert_eq!(aborted, ProviderState::Aborted);
    assert_eq!(second.unwrap().frames, 3);
}

/// A corrupted `OK` is fatal for the session.
#[tokio::test]
async fn provider_aborts_on_corrupted_ok() {
    let mut provider = provider(vec![0u8; 10], timings(200)).await;
    let addr = provider.local_addr();
    let session = tokio::spawn(async move {
        let client = provider.accept().await.unwrap();
        provider.session(client, NoProgress).await
    });

    let fake = loopback().await;
    let me = EndpointId::new("fakeclient");
    send(&fake, Frame::control(EndpointId::unknown(), me, tokens::REQUEST_DATA), addr).await;
    recv_frame(&fake).await; // request_accepted
    let (size, _, _) = recv_frame(&fake).await;
    let ok = Frame::control(size.src, me, tokens::OK).encode().unwrap();
    fake.send_to(&flip_payload_bit(&ok, 1), addr).await.unwrap();

    let result = tokio::time::timeout(Duration::from_secs(2), session)
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(result, Err(TransferError::Corrupted { stage: "OK" })));
}

/// Requests with a bad integrity code are dropped without a reply.
#[tokio::test]
async fn provider_ignores_corrupted_request() {
    let mut provider = provider(vec![0u8; 10], timings(200)).await;
    let addr = provider.local_addr();
    let accept = tokio::spawn(async move { provider.accept().await.map(|c| c.id) });

    let fake = loopback().await;
    let me = EndpointId::new("fakeclient");
    let request = Frame::control(EndpointId::unknown(), me, tokens::REQUEST_DATA)
        .encode()
        .unwrap();
    fake.send_to(&flip_payload_bit(&request, 0), addr).await.unwrap();
    assert!(fake.poll_recv(Duration::from_millis(200)).await.unwrap().is_none());

    fake.send_to(&request, addr).await.unwrap();
    let id = tokio::time::timeout(Duration::from_secs(2), accept)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(id, me);
}
