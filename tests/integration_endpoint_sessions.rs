use anyhow::Result;
use squeue_bus::clock::MonotonicClock;
use squeue_bus::registry::INBOUND_NAME;
use squeue_bus::{BusError, BusRegistry, Message, Payload, StatusCode, RECORD_SIZE};
use std::sync::Arc;

fn reference_bus() -> Result<BusRegistry> {
    Ok(BusRegistry::new(10, 3, Arc::new(MonotonicClock::new()))?)
}

/// Ten writes fill a capacity-10 endpoint, the eleventh is refused, and reads
/// come back in write order until the endpoint is empty again.
#[test]
fn capacity_ten_fill_and_drain_through_sessions() -> Result<()> {
    let bus = reference_bus()?;
    let session = bus.open("bus_out_q1")?;

    for id in 0..10 {
        session.write(&Message::new(id, 1, 1, Payload::from_text("fill")))?;
    }
    let refused = session
        .write(&Message::new(10, 1, 1, Payload::zeroed()))
        .unwrap_err();
    assert_eq!(refused.status(), -libc::EAGAIN);
    assert!(refused.is_retryable());

    let ids: Vec<u32> = (0..10).map(|_| session.read().map(|m| m.id)).collect::<Result<_, _>>()?;
    assert_eq!(ids, (0..10).collect::<Vec<_>>());

    let empty = session.read().unwrap_err();
    assert_eq!(empty.status(), -libc::EAGAIN);
    Ok(())
}

/// The raw record interface moves exactly `RECORD_SIZE` bytes per call and
/// reports failures as negative errno values.
#[test]
fn byte_sessions_report_status_codes() -> Result<()> {
    let bus = reference_bus()?;
    let writer = bus.open(INBOUND_NAME)?;
    let reader = bus.open(INBOUND_NAME)?;

    let record = Message::new(3, 2, 1, Payload::from_text("over the wire")).to_record()?;
    assert_eq!(record.len(), RECORD_SIZE);
    assert_eq!(writer.write_status(&record), 0);
    assert_eq!(writer.write_status(&record[..RECORD_SIZE - 8]), -libc::EINVAL);

    let mut buf = vec![0u8; RECORD_SIZE];
    assert_eq!(reader.read_status(&mut buf), RECORD_SIZE as isize);
    let received = Message::from_record(&buf)?;
    assert_eq!(received.id, 3);
    assert_eq!(received.source_id, 2);
    assert_eq!(received.payload.as_text(), "over the wire");

    assert_eq!(reader.read_status(&mut buf), -(libc::EAGAIN as isize));
    let mut long = vec![0u8; RECORD_SIZE * 2];
    assert_eq!(reader.read_status(&mut long), -(libc::EINVAL as isize));
    Ok(())
}

#[test]
fn unknown_endpoint_names_are_refused() -> Result<()> {
    let bus = reference_bus()?;
    let err = bus.open("bus_out_q4").unwrap_err();
    assert_eq!(
        err,
        BusError::UnknownEndpoint {
            name: "bus_out_q4".to_string()
        }
    );
    assert_eq!(err.to_string(), "unknown endpoint: bus_out_q4");
    Ok(())
}

/// Closing a session releases what is still queued; the registry releases
/// whatever remains elsewhere when it is torn down.
#[test]
fn close_and_teardown_release_resident_messages() -> Result<()> {
    let bus = reference_bus()?;
    let inbound = bus.open(INBOUND_NAME)?;
    let outbound = bus.open("bus_out_q2")?;

    for id in 0..4 {
        inbound.write(&Message::new(id, 1, 2, Payload::zeroed()))?;
    }
    outbound.write(&Message::new(99, 1, 2, Payload::zeroed()))?;

    assert_eq!(inbound.close(), 4);
    assert_eq!(bus.inbound().len(), 0);
    assert_eq!(bus.teardown(), 1);
    assert!(bus.endpoints().all(|e| e.is_empty()));
    Ok(())
}
