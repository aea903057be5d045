//! End-to-end tests of the header query socket served by a running personality.

mod common;

use cam_personality::header::AssembledHeader;
use cam_personality::server::query;
use cam_personality::StatusValue;
use common::create_personality;
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

const QUERY_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::test]
async fn test_hdr_request_returns_assembled_header() {
    let fixture = create_personality();
    let p = &fixture.personality;
    p.start().await.unwrap();
    let addr = p.state().query_addr().unwrap().to_string();

    let response = query(&addr, "hdr 9999 1 4.5", QUERY_TIMEOUT).await.unwrap();
    assert_eq!(response.len() % 2880, 0);

    let header = AssembledHeader::from_fits_bytes(&response);
    assert_eq!(header.get("FRAMEID"), Some(&StatusValue::Int(9999)));
    assert_eq!(header.get("EXPTIME"), Some(&StatusValue::Float(4.5)));
    assert_eq!(header.get("RA"), Some(&StatusValue::from("10:00:00")));
    assert_eq!(header.get("CRVAL1"), Some(&StatusValue::Float(150.0)));
    assert_eq!(header.get("CRVAL2"), Some(&StatusValue::Float(-20.5)));
    assert_eq!(header.get("D_LOOP"), Some(&StatusValue::from("ON")));

    p.stop().await.unwrap();
}

#[tokio::test]
async fn test_short_header_request() {
    let fixture = create_personality();
    let p = &fixture.personality;
    p.start().await.unwrap();
    let addr = p.state().query_addr().unwrap().to_string();

    let response = query(&addr, "hdr 12 0 1.0 false\n", QUERY_TIMEOUT).await.unwrap();
    let header = AssembledHeader::from_fits_bytes(&response);
    assert_eq!(header.len(), 12);
    assert_eq!(header.get("OBJECT"), None);

    p.stop().await.unwrap();
}

#[tokio::test]
async fn test_seqno_returns_frame_ids() {
    let fixture = create_personality();
    let p = &fixture.personality;
    p.start().await.unwrap();
    let addr = p.state().query_addr().unwrap().to_string();

    let response = query(&addr, "seqno 2 A", QUERY_TIMEOUT).await.unwrap();
    let text = String::from_utf8(response).unwrap();
    let frames: Vec<&str> = text.lines().collect();
    assert_eq!(frames, ["CRSA00000001", "CRSA00000002"]);

    p.stop().await.unwrap();
}

#[tokio::test]
async fn test_garbage_and_empty_requests_get_a_response() {
    let fixture = create_personality();
    let p = &fixture.personality;
    p.start().await.unwrap();
    let addr = p.state().query_addr().unwrap().to_string();

    // Unknown command: one explanatory COMMENT card.
    let response = query(&addr, "xyzzy 1 2 3", QUERY_TIMEOUT).await.unwrap();
    let header = AssembledHeader::from_fits_bytes(&response);
    assert_eq!(header.len(), 1);
    assert_eq!(header.cards()[0].comment, "unsupported command: xyzzy");

    // Malformed arguments: empty header, connection still closed cleanly.
    let response = query(&addr, "hdr nine one four", QUERY_TIMEOUT).await.unwrap();
    assert_eq!(response.len(), 2880);
    assert!(AssembledHeader::from_fits_bytes(&response).is_empty());

    // Client that connects and sends nothing.
    let mut stream = TcpStream::connect(&addr).await.unwrap();
    stream.shutdown().await.unwrap();
    let mut response = Vec::new();
    tokio::io::AsyncReadExt::read_to_end(&mut stream, &mut response)
        .await
        .unwrap();
    assert!(!response.is_empty());

    // The server is still serving afterwards.
    let response = query(&addr, "hdr 1 1 0", QUERY_TIMEOUT).await.unwrap();
    assert!(AssembledHeader::from_fits_bytes(&response).get("FRAMEID").is_some());

    p.stop().await.unwrap();
}

#[tokio::test]
async fn test_out_of_range_requests_do_not_stop_the_server() {
    let fixture = create_personality();
    let p = &fixture.personality;
    p.start().await.unwrap();
    let addr = p.state().query_addr().unwrap().to_string();

    // Exposure ending past the representable calendar.
    let response = query(&addr, "hdr 1 1 1e13", QUERY_TIMEOUT).await.unwrap();
    assert_eq!(response.len(), 2880);
    assert!(AssembledHeader::from_fits_bytes(&response).is_empty());

    // Frame count far above the per-request cap.
    let response = query(&addr, "seqno 4000000000 A", QUERY_TIMEOUT).await.unwrap();
    assert_eq!(response.len(), 2880);
    assert!(AssembledHeader::from_fits_bytes(&response).is_empty());

    let response = query(&addr, "hdr 1 1 1.0", QUERY_TIMEOUT).await.unwrap();
    let header = AssembledHeader::from_fits_bytes(&response);
    assert_eq!(header.get("EXPTIME"), Some(&StatusValue::Float(1.0)));
    assert!(p.state().is_running());

    p.stop().await.unwrap();
}

#[tokio::test]
async fn test_stop_is_observed_without_connections() {
    let fixture = create_personality();
    let p = &fixture.personality;
    p.start().await.unwrap();
    let addr = p.state().query_addr().unwrap();

    let start = Instant::now();
    p.stop().await.unwrap();
    assert!(
        start.elapsed() < Duration::from_secs(2),
        "Stop took too long: {:?}",
        start.elapsed()
    );

    assert!(TcpStream::connect(addr).await.is_err());
}
