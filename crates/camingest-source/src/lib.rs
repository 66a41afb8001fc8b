//! Packet sources for camera ingestion.
//!
//! A source is opened for a URL and a transport, yields encoded packets
//! tagged with a stream index, and exposes per-stream metadata. Reads are
//! blocking and belong to a single owning thread; the only operation that
//! may be invoked from another thread is [`SourceCloser::close`], which
//! unblocks a pending read.

mod error;
mod packet;
mod synthetic;

use std::sync::Arc;

use camingest_types::Transport;

pub use error::{ReadErrorClass, SourceError};
pub use packet::{MediaKind, Packet, Rational, StreamInfo};
pub use synthetic::{SyntheticOpener, SyntheticSource, STUB_SCHEME};

/// Result type for source operations.
pub type SourceResult<T> = Result<T, SourceError>;

/// An open packet source.
pub trait PacketSource: Send {
    /// Metadata for every elementary stream in the source.
    fn streams(&self) -> &[StreamInfo];

    /// Read the next packet, blocking until one is available.
    fn read_packet(&mut self) -> SourceResult<Packet>;

    /// Handle that can close this source from any thread.
    fn closer(&self) -> Arc<dyn SourceCloser>;

    /// Index of the first video stream, if any.
    fn video_index(&self) -> Option<usize> {
        first_of_kind(self.streams(), MediaKind::Video)
    }

    /// Index of the first audio stream, if any.
    fn audio_index(&self) -> Option<usize> {
        first_of_kind(self.streams(), MediaKind::Audio)
    }
}

/// Force-close handle for a source.
///
/// Closing is idempotent and makes any blocked or later read fail with
/// [`SourceError::Closed`].
pub trait SourceCloser: Send + Sync {
    /// Close the source.
    fn close(&self);

    /// Check whether the source has been closed.
    fn is_closed(&self) -> bool;
}

/// Opens packet sources.
pub trait SourceOpener: Send + Sync {
    /// Open `url` using the given transport.
    fn open(&self, url: &str, transport: Transport) -> SourceResult<Box<dyn PacketSource>>;
}

fn first_of_kind(streams: &[StreamInfo], kind: MediaKind) -> Option<usize> {
    streams.iter().find(|s| s.kind == kind).map(|s| s.index)
}
