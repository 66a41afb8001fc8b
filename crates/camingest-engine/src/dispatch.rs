//! Packet delivery to consumers.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::MutexGuard;
use tracing::error;

use camingest_source::{Packet, StreamInfo};
use camingest_types::StreamKind;

use crate::session::SessionShared;

/// Stream a dispatched packet belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamDescriptor {
    pub kind: StreamKind,
    pub info: StreamInfo,
}

impl StreamDescriptor {
    pub fn new(kind: StreamKind, info: StreamInfo) -> Self {
        Self { kind, info }
    }
}

/// Receives normalized packets from a reader session.
///
/// Invoked on the session thread, one packet at a time. Errors are logged
/// and counted; they never stop the session.
pub trait PacketConsumer: Send + Sync {
    fn on_packet(&self, packet: &Packet, stream: &StreamDescriptor) -> anyhow::Result<()>;
}

impl<F> PacketConsumer for F
where
    F: Fn(&Packet, &StreamDescriptor) -> anyhow::Result<()> + Send + Sync,
{
    fn on_packet(&self, packet: &Packet, stream: &StreamDescriptor) -> anyhow::Result<()> {
        self(packet, stream)
    }
}

/// Shared consumer reference held by a session.
pub type PacketCallback = Arc<dyn PacketConsumer>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DispatchOutcome {
    Delivered,
    ConsumerFailed,
    Skipped,
}

/// Hand `packet` to the session's consumer. The caller holds the session's
/// packet lock for the whole call.
pub(crate) fn dispatch(
    shared: &SessionShared,
    _packet_lock: &MutexGuard<'_, ()>,
    packet: &Packet,
    stream: &StreamDescriptor,
) -> DispatchOutcome {
    if !shared.is_running() {
        return DispatchOutcome::Skipped;
    }
    let Some(consumer) = shared.consumer() else {
        return DispatchOutcome::Skipped;
    };

    match panic::catch_unwind(AssertUnwindSafe(|| consumer.on_packet(packet, stream))) {
        Ok(Ok(())) => {
            shared.metrics().record_dispatch(stream.kind);
            DispatchOutcome::Delivered
        }
        Ok(Err(e)) => {
            shared.metrics().record_consumer_error();
            error!(
                stream = %shared.name(),
                kind = ?stream.kind,
                error = %format!("{e:#}"),
                "Packet consumer failed"
            );
            DispatchOutcome::ConsumerFailed
        }
        Err(payload) => {
            shared.metrics().record_consumer_error();
            error!(
                stream = %shared.name(),
                kind = ?stream.kind,
                panic = %panic_message(payload.as_ref()),
                "Packet consumer panicked"
            );
            DispatchOutcome::ConsumerFailed
        }
    }
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
