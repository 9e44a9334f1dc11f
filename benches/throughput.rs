use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use tokio::runtime::Runtime;

use confidential_session::{
    AttestationType, ClientSession, HandshakeType, Message, ProtocolEngine, SecureChannel,
    ServerSession, Session, SessionConfig,
};

/// 2MB duplex buffer, creates realistic backpressure for large payloads.
const DUPLEX_SIZE: usize = 2 * 1024 * 1024;

const PAYLOADS: &[(&str, usize)] = &[
    ("64b", 64),
    ("1k", 1_024),
    ("16k", 16_384),
    ("1m", 1_048_576),
];

/// Target ~4MB of data per iteration so large payloads get enough samples.
fn burst_count(payload_size: usize) -> usize {
    (4 * 1_048_576 / payload_size).max(1)
}

fn config() -> SessionConfig {
    SessionConfig::builder(AttestationType::Unattested, HandshakeType::NoiseNN)
        .build()
        .unwrap()
}

fn open_pair() -> (ClientSession, ServerSession) {
    let mut client = ClientSession::create(config()).unwrap();
    let mut server = ServerSession::create(config()).unwrap();
    while !(client.is_open() && server.is_open()) {
        while let Some(request) = client.get_outgoing_message() {
            server.put_incoming_message(request).unwrap();
        }
        while let Some(response) = server.get_outgoing_message() {
            client.put_incoming_message(response).unwrap();
        }
    }
    (client, server)
}

/// Seal on one session and open on the other, with no transport in between.
fn bench_record_layer(c: &mut Criterion) {
    let mut group = c.benchmark_group("throughput/record_layer");

    for &(label, size) in PAYLOADS {
        let burst = burst_count(size);
        let payload = vec![0xABu8; size];
        group.throughput(Throughput::Bytes((size * burst) as u64));

        group.bench_with_input(BenchmarkId::new("write_read", label), &payload, |b, payload| {
            let (mut client, mut server) = open_pair();
            b.iter(|| {
                for _ in 0..burst {
                    client.write(payload).unwrap();
                    let record = client.get_outgoing_message().unwrap();
                    server.put_incoming_message(record).unwrap();
                    let plaintext = server.read().unwrap().unwrap();
                    assert_eq!(plaintext.len(), payload.len());
                }
            });
        });
    }

    group.finish();
}

fn bench_secure_channel(c: &mut Criterion) {
    let mut group = c.benchmark_group("throughput/secure_channel");

    for &(label, size) in PAYLOADS {
        let burst = burst_count(size);
        let payload = vec![0xABu8; size];
        group.throughput(Throughput::Bytes((size * burst) as u64));

        group.bench_with_input(BenchmarkId::new("send_recv", label), &payload, |b, payload| {
            let rt = Runtime::new().unwrap();

            // Establish the channel once and reuse it across iterations.
            let (mut client, mut server) = rt.block_on(async {
                let (client, server) = tokio::io::duplex(DUPLEX_SIZE);
                let (server_ch, client_ch) = tokio::join!(
                    SecureChannel::accept(server, config()),
                    SecureChannel::connect(client, config()),
                );
                (client_ch.unwrap(), server_ch.unwrap())
            });

            b.iter(|| {
                rt.block_on(async {
                    let sender = async {
                        for _ in 0..burst {
                            client.send(payload).await.unwrap();
                        }
                    };
                    let receiver = async {
                        for _ in 0..burst {
                            match server.recv().await.unwrap() {
                                Message::Data(data) => assert_eq!(data.len(), payload.len()),
                                Message::Shutdown => panic!("unexpected shutdown"),
                            }
                        }
                    };
                    tokio::join!(sender, receiver);
                });
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_record_layer, bench_secure_channel);
criterion_main!(benches);
