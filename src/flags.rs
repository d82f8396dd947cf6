//! Per-PD status bitmask: a sparse, independently toggleable set of boolean
//! properties expressed as a `bitflags` type rather than a struct of `bool`
//! fields.

use bitflags::bitflags;

bitflags! {
    /// Boolean state tracked per PD record.
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
    pub struct PdFlags: u32 {
        /// PD advertised Secure Channel support in its capabilities reply.
        const SC_CAPABLE = 0b0000_0000_0001;

        /// PD is reporting a tamper condition.
        const TAMPER = 0b0000_0000_0010;

        /// PD is reporting a power (brownout) condition.
        const POWER = 0b0000_0000_0100;

        /// PD is reporting a remote tamper condition (downstream reader).
        const R_TAMPER = 0b0000_0000_1000;

        /// A command has been transmitted and its reply has not yet been
        /// decoded or timed out. At most one PD command is ever in flight.
        const AWAIT_RESP = 0b0000_0001_0000;

        /// Debug escape hatch: accept any sequence number.
        const SKIP_SEQ_CHECK = 0b0000_0010_0000;

        /// The current handshake is falling back to the well-known
        /// default key (SCBK-D) rather than the provisioned SCBK.
        const SC_USE_SCBKD = 0b0000_0100_0000;

        /// Secure Channel session keys are derived and both cryptograms
        /// have been verified in the current handshake.
        const SC_ACTIVE = 0b0000_1000_0000;

        /// The SCBK-D fallback handshake has already been attempted once
        /// this session; a second failure forces the PD offline.
        const SC_SCBKD_DONE = 0b0001_0000_0000;

        /// Install mode: key enrollment commands are accepted.
        const INSTALL_MODE = 0b0010_0000_0000;

        /// This record represents our own PD role rather than a peer we
        /// poll as CP.
        const PD_MODE = 0b0100_0000_0000;
    }
}
