//! Performance benchmarks for the codec and the track decoder

use assert_approx_eq::assert_approx_eq;
use gbx::{GbxTrackDecoder, TRACK_CLASSES};
use indexmap::IndexMap;
use rpc::codec::{decode_response, encode_call, encode_value, MethodResponse};
use rpc::Value;
use std::time::Instant;

fn player_list(count: i32) -> Value {
    Value::Array(
        (0..count)
            .map(|i| {
                let mut player = IndexMap::new();
                player.insert("Login".to_string(), Value::from(format!("player{}", i)));
                player.insert("NickName".to_string(), Value::from(format!("$fffPlayer {}", i)));
                player.insert("PlayerId".to_string(), Value::from(i));
                player.insert("TeamId".to_string(), Value::from(-1));
                player.insert("SpectatorStatus".to_string(), Value::from(0));
                player.insert("LadderRanking".to_string(), Value::from(i * 10));
                player.insert("LadderScore".to_string(), Value::from(f64::from(i) + 0.5));
                player.insert("IsSpectator".to_string(), Value::from(false));
                Value::Struct(player)
            })
            .collect(),
    )
}

/// Benchmarks encoding of method calls
#[test]
fn benchmark_call_encoding() {
    let params = vec![
        Value::from("Welcome to the server & have fun"),
        Value::from(1500),
        Value::from(true),
    ];

    let iterations = 10_000;
    let start = Instant::now();

    for _ in 0..iterations {
        let _ = encode_call("ChatSendServerMessage", &params).unwrap();
    }

    let duration = start.elapsed();
    println!(
        "Call encoding: {} iterations in {:?} ({:.2} μs/iter)",
        iterations,
        duration,
        duration.as_micros() as f64 / iterations as f64
    );

    // Should complete in under 1 second
    assert!(duration.as_millis() < 1000);
}

/// Benchmarks decoding of a large player list response
#[test]
fn benchmark_response_decoding() {
    let body = encode_value(&player_list(250)).unwrap();
    let xml = format!(
        "<methodResponse><params><param>{}</param></params></methodResponse>",
        body
    );

    let iterations = 50;
    let start = Instant::now();

    for _ in 0..iterations {
        match decode_response(&xml).unwrap() {
            MethodResponse::Params(Value::Array(players)) => assert_eq!(players.len(), 250),
            other => panic!("Unexpected response {:?}", other),
        }
    }

    let duration = start.elapsed();
    println!(
        "Response decoding: {} × {} bytes in {:?} ({:.2} μs/iter)",
        iterations,
        xml.len(),
        duration,
        duration.as_micros() as f64 / iterations as f64
    );

    // Should complete in under 5 seconds
    assert!(duration.as_millis() < 5000);

    if let MethodResponse::Params(players) = decode_response(&xml).unwrap() {
        let score = players.as_array().unwrap()[3]
            .get("LadderScore")
            .and_then(Value::as_f64)
            .unwrap();
        assert_approx_eq!(score, 3.5);
    }
}

/// Benchmarks decoding of a track header
#[test]
fn benchmark_track_decoding() {
    let mut info = vec![13u8];
    info.extend_from_slice(&[0u8; 56]);

    let mut data = b"GBX".to_vec();
    data.extend_from_slice(&6u16.to_le_bytes());
    data.extend_from_slice(b"BUCR");
    data.extend_from_slice(&0x0304_3000u32.to_le_bytes());
    data.extend_from_slice(&69u32.to_le_bytes());
    data.extend_from_slice(&1u32.to_le_bytes());
    data.extend_from_slice(&0x0304_3002u32.to_le_bytes());
    data.extend_from_slice(&57u32.to_le_bytes());
    data.extend_from_slice(&info);

    let iterations = 20_000;
    let start = Instant::now();

    for _ in 0..iterations {
        let _ = GbxTrackDecoder::decode(&data, TRACK_CLASSES).unwrap();
    }

    let duration = start.elapsed();
    println!(
        "Track decoding: {} iterations in {:?} ({:.2} ns/iter)",
        iterations,
        duration,
        duration.as_nanos() as f64 / iterations as f64
    );

    // Should complete in under 2 seconds
    assert!(duration.as_millis() < 2000);
}
