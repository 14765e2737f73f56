//! Client keepalive task.
//!
//! Sends CONNECTION_KEEPALIVE after `keepalive_interval` without any
//! outbound traffic. Every send on the connection pushes the deadline back.

use crate::client::Client;
use squabble_core::{ConnectionEvent, Peer};
use squabble_protocol::code;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Starts the keepalive task for `client`. It stops when the connection ends.
pub(crate) fn spawn(client: &Arc<Client>) -> JoinHandle<()> {
    let interval = client.config().keepalive_interval;
    let activity = client.endpoint().activity();
    let mut events = client.endpoint().events();
    let weak = Arc::downgrade(client);

    tokio::spawn(async move {
        let deadline = tokio::time::sleep(interval);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                _ = activity.notified() => {
                    deadline.as_mut().reset(Instant::now() + interval);
                }
                _ = &mut deadline => {
                    let Some(client) = weak.upgrade() else { break };
                    if !client.is_connected() {
                        break;
                    }
                    let endpoint = client.endpoint();
                    if let Err(e) = endpoint
                        .send_command(code::CONNECTION_KEEPALIVE, Vec::<&str>::new())
                        .await
                    {
                        tracing::debug!("{} Keepalive failed: {}", endpoint.network_name(), e);
                        break;
                    }
                    deadline.as_mut().reset(Instant::now() + interval);
                }
                event = events.recv() => match event {
                    Ok(ConnectionEvent::Ended) | Err(RecvError::Closed) => break,
                    Ok(_) | Err(RecvError::Lagged(_)) => {}
                },
            }
        }
        tracing::trace!("Keepalive stopped");
    })
}
