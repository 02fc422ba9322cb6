use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use modbus_host::host::{Host, HostEvent};
use modbus_host::transport::SerialPortLister;
use modbus_host::types::TransportConfig;
use modbus_host::{DecodeLevel, ExceptionCode, RequestError};

/// Register address the mock slave never answers, to provoke timeouts
const SILENT_ADDRESS: u16 = 0x0FFF;
/// Register address the mock slave answers with an exception
const EXCEPTION_ADDRESS: u16 = 0x0EEE;

type Registers = Arc<Mutex<HashMap<u16, u16>>>;

/// A minimal Modbus/TCP slave serving one connection: reads come from a
/// shared register map, writes update it, and two magic addresses trigger
/// the silence and exception paths.
async fn run_slave(listener: TcpListener, registers: Registers) {
    let (mut socket, _) = listener.accept().await.unwrap();

    loop {
        let mut header = [0u8; 6];
        if socket.read_exact(&mut header).await.is_err() {
            return;
        }
        let length = u16::from_be_bytes([header[4], header[5]]) as usize;
        let mut pdu = vec![0u8; length];
        if socket.read_exact(&mut pdu).await.is_err() {
            return;
        }

        let unit = pdu[0];
        let function = pdu[1];
        let address = u16::from_be_bytes([pdu[2], pdu[3]]);

        let reply: Vec<u8> = match function {
            0x03 | 0x04 => {
                if address == SILENT_ADDRESS {
                    continue;
                }
                if address == EXCEPTION_ADDRESS {
                    vec![unit, function | 0x80, 0x02]
                } else {
                    let count = u16::from_be_bytes([pdu[4], pdu[5]]);
                    let mut reply = vec![unit, function, (count * 2) as u8];
                    let registers = registers.lock().unwrap();
                    for i in 0..count {
                        let value = registers.get(&(address + i)).copied().unwrap_or(0);
                        reply.extend_from_slice(&value.to_be_bytes());
                    }
                    reply
                }
            }
            0x06 => {
                let value = u16::from_be_bytes([pdu[4], pdu[5]]);
                registers.lock().unwrap().insert(address, value);
                pdu.clone()
            }
            0x10 => {
                let count = u16::from_be_bytes([pdu[4], pdu[5]]);
                {
                    let mut registers = registers.lock().unwrap();
                    for i in 0..count {
                        let offset = 7 + 2 * i as usize;
                        let value = u16::from_be_bytes([pdu[offset], pdu[offset + 1]]);
                        registers.insert(address + i, value);
                    }
                }
                pdu[..6].to_vec()
            }
            _ => continue,
        };

        let mut frame = vec![header[0], header[1], 0x00, 0x00];
        frame.extend_from_slice(&(reply.len() as u16).to_be_bytes());
        frame.extend_from_slice(&reply);
        socket.write_all(&frame).await.unwrap();
    }
}

struct Fixture {
    host: Host,
    registers: Registers,
    events: std::sync::mpsc::Receiver<HostEvent>,
}

async fn fixture() -> Fixture {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let registers: Registers = Arc::new(Mutex::new(HashMap::new()));
    tokio::spawn(run_slave(listener, registers.clone()));

    let (tx, events) = std::sync::mpsc::channel();
    let host = Host::spawn_with_listener(
        DecodeLevel::nothing(),
        Box::new(move |event| {
            let _ = tx.send(event);
        }),
    );
    host.open_tcp("127.0.0.1", port).await.unwrap();

    Fixture {
        host,
        registers,
        events,
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn read_returns_count_values() {
    let f = fixture().await;
    {
        let mut registers = f.registers.lock().unwrap();
        registers.insert(0x0000, 10);
        registers.insert(0x0001, 11);
    }

    let result = f
        .host
        .read(1, 0x0000, 2, false, Duration::from_secs(2))
        .await
        .unwrap();

    assert_eq!(result.unit_id.value, 1);
    assert_eq!(result.address, 0x0000);
    assert_eq!(result.count, 2);
    assert_eq!(result.values, [10, 11]);
    assert_eq!(result.values.len(), result.count as usize);
}

#[tokio::test(flavor = "multi_thread")]
async fn read_without_open_transport_is_rejected() {
    let host = Host::spawn(DecodeLevel::nothing());
    let result = host.read(1, 0, 1, false, Duration::from_millis(100)).await;
    assert_eq!(result, Err(RequestError::NoActiveSession));
}

#[tokio::test(flavor = "multi_thread")]
async fn read_with_invalid_count_never_reaches_the_wire() {
    let f = fixture().await;
    let result = f.host.read(1, 0, 0, false, Duration::from_secs(1)).await;
    assert!(matches!(result, Err(RequestError::BadRequest(_))));
    let result = f.host.read(1, 0, 126, false, Duration::from_secs(1)).await;
    assert!(matches!(result, Err(RequestError::BadRequest(_))));
}

#[tokio::test(flavor = "multi_thread")]
async fn read_times_out_when_the_slave_stays_silent() {
    let f = fixture().await;

    let result = f
        .host
        .read(1, SILENT_ADDRESS, 1, false, Duration::from_millis(200))
        .await;
    assert_eq!(result, Err(RequestError::ResponseTimeout));

    // the abandoned read must not absorb the next response
    f.registers.lock().unwrap().insert(0x0005, 77);
    let result = f
        .host
        .read(1, 0x0005, 1, false, Duration::from_secs(2))
        .await
        .unwrap();
    assert_eq!(result.values, [77]);
}

#[tokio::test(flavor = "multi_thread")]
async fn write_single_is_observable_through_a_subsequent_read() {
    let f = fixture().await;

    f.host.write_single(1, 0x0010, 0xBEEF).unwrap();

    // per-session writes are FIFO, so the read arrives after the write
    let result = f
        .host
        .read(1, 0x0010, 1, false, Duration::from_secs(2))
        .await
        .unwrap();
    assert_eq!(result.values, [0xBEEF]);
}

#[tokio::test(flavor = "multi_thread")]
async fn write_multiple_is_observable_through_a_subsequent_read() {
    let f = fixture().await;

    f.host
        .write_multiple(1, 0x0020, vec![1, 2, 3])
        .unwrap();

    let result = f
        .host
        .read(1, 0x0020, 3, false, Duration::from_secs(2))
        .await
        .unwrap();
    assert_eq!(result.values, [1, 2, 3]);
}

#[tokio::test(flavor = "multi_thread")]
async fn write_multiple_rejects_empty_values() {
    let f = fixture().await;
    assert!(matches!(
        f.host.write_multiple(1, 0, vec![]),
        Err(RequestError::BadRequest(_))
    ));
}

#[tokio::test(flavor = "multi_thread")]
async fn exception_response_surfaces_as_event_and_read_times_out() {
    let f = fixture().await;

    // an exception does not complete the pending read; the caller times out
    let result = f
        .host
        .read(1, EXCEPTION_ADDRESS, 1, false, Duration::from_millis(300))
        .await;
    assert_eq!(result, Err(RequestError::ResponseTimeout));

    // but the exception itself was delivered to the listener
    let mut saw_exception = false;
    while let Ok(event) = f.events.try_recv() {
        if let HostEvent::Response(response) = event {
            if response.exception == Some(ExceptionCode::IllegalDataAddress) {
                saw_exception = true;
            }
        }
    }
    assert!(saw_exception);
}

#[tokio::test(flavor = "multi_thread")]
async fn read_group_reads_sequentially() {
    let f = fixture().await;
    {
        let mut registers = f.registers.lock().unwrap();
        registers.insert(0x0000, 5);
        registers.insert(0x0100, 6);
    }

    let requests = [
        modbus_host::types::ReadRequest {
            unit_id: 1,
            address: 0x0000,
            count: 1,
            input: false,
        },
        modbus_host::types::ReadRequest {
            unit_id: 1,
            address: 0x0100,
            count: 1,
            input: true,
        },
    ];

    let results = f
        .host
        .read_group(&requests, Duration::from_secs(2))
        .await
        .unwrap();
    assert_eq!(results.len(), 2);
    assert_eq!(results[0].values, [5]);
    assert_eq!(results[1].values, [6]);
}

#[tokio::test(flavor = "multi_thread")]
async fn write_group_stops_at_first_error() {
    let f = fixture().await;

    let requests = [
        modbus_host::types::WriteRequest::Single {
            unit_id: 1,
            address: 0x0030,
            value: 1,
        },
        modbus_host::types::WriteRequest::Multiple {
            unit_id: 1,
            address: 0x0031,
            values: vec![],
        },
        modbus_host::types::WriteRequest::Single {
            unit_id: 1,
            address: 0x0032,
            value: 3,
        },
    ];

    assert!(f.host.write_group(&requests).is_err());

    // the first write landed, the one after the failure did not
    let result = f
        .host
        .read(1, 0x0030, 1, false, Duration::from_secs(2))
        .await
        .unwrap();
    assert_eq!(result.values, [1]);
    let result = f
        .host
        .read(1, 0x0032, 1, false, Duration::from_secs(2))
        .await
        .unwrap();
    assert_eq!(result.values, [0]);
}

#[tokio::test(flavor = "multi_thread")]
async fn switch_closes_the_active_transport_and_opens_the_target() {
    let f = fixture().await;
    let first = f.host.status().config;

    // a second slave with its own register map
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let registers: Registers = Arc::new(Mutex::new(HashMap::new()));
    registers.lock().unwrap().insert(0x0000, 99);
    tokio::spawn(run_slave(listener, registers));

    let target = TransportConfig::Tcp {
        host: "127.0.0.1".to_string(),
        port,
    };
    let previous = f.host.switch(target.clone()).await.unwrap();
    assert_eq!(previous, first);

    let status = f.host.status();
    assert!(status.active);
    assert_eq!(status.config, Some(target));

    // reads now reach the second slave
    let result = f
        .host
        .read(1, 0x0000, 1, false, Duration::from_secs(2))
        .await
        .unwrap();
    assert_eq!(result.values, [99]);
}

struct FixedPorts;

impl SerialPortLister for FixedPorts {
    fn list(&self) -> Vec<String> {
        vec!["/dev/ttyUSB0".to_string(), "/dev/ttyS1".to_string()]
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn injected_port_lister_backs_serial_enumeration() {
    let mut host = Host::spawn(DecodeLevel::nothing());
    host.set_port_lister(Box::new(FixedPorts));
    assert_eq!(host.list_serial_ports(), ["/dev/ttyUSB0", "/dev/ttyS1"]);
}

#[tokio::test(flavor = "multi_thread")]
async fn status_and_close_report_the_transport_lifecycle() {
    let f = fixture().await;

    let status = f.host.status();
    assert!(status.active);
    assert!(status.config.is_some());

    let closed = f.host.close_active();
    assert!(closed.is_some());
    assert_eq!(closed, status.config);

    let status = f.host.status();
    assert!(!status.active);

    // closing again is a no-op
    assert!(f.host.close_active().is_none());

    let result = f.host.read(1, 0, 1, false, Duration::from_millis(100)).await;
    assert_eq!(result, Err(RequestError::NoActiveSession));
}
