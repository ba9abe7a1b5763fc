//! Wire format selector
//!
//! Chooses how a connection encodes values on the wire. The engine never
//! frames bytes itself; this is a hint handed to the transport collaborator.

/// Wire encoding requested for a remote connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WireFormat {
    /// Human-readable text encoding.
    #[default]
    Text,
    /// Compact binary encoding.
    Binary,
    /// Query-string style encoding, used for handshake metadata.
    Query,
}
