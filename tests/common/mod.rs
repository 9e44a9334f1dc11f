#![allow(dead_code)]

use confidential_session::{ClientSession, ProtocolEngine, Result, ServerSession, Session};

/// Shuttle messages between the two sessions until neither has anything
/// left to send. Returns the number of flights exchanged.
pub fn pump(client: &mut ClientSession, server: &mut ServerSession) -> Result<usize> {
    let mut flights = 0;
    loop {
        let mut moved = false;
        while let Some(request) = client.get_outgoing_message() {
            server.put_incoming_message(request)?;
            moved = true;
        }
        if moved {
            flights += 1;
        }
        let mut replied = false;
        while let Some(response) = server.get_outgoing_message() {
            client.put_incoming_message(response)?;
            replied = true;
        }
        if replied {
            flights += 1;
        }
        if !moved && !replied {
            return Ok(flights);
        }
    }
}

/// Write on one side and deliver every resulting record to the other.
pub fn send_to_server(
    client: &mut ClientSession,
    server: &mut ServerSession,
    data: &[u8],
) -> Result<()> {
    client.write(data)?;
    while let Some(request) = client.get_outgoing_message() {
        server.put_incoming_message(request)?;
    }
    Ok(())
}

pub fn send_to_client(
    server: &mut ServerSession,
    client: &mut ClientSession,
    data: &[u8],
) -> Result<()> {
    server.write(data)?;
    while let Some(response) = server.get_outgoing_message() {
        client.put_incoming_message(response)?;
    }
    Ok(())
}

pub fn assert_open(client: &ClientSession, server: &ServerSession) {
    assert!(client.is_open(), "client not open: {:?}", client.state());
    assert!(server.is_open(), "server not open: {:?}", server.state());
}
