//! Engine-init configuration (§6 "Configuration").
//!
//! Small, `serde`-derived value types an embedder can load from
//! TOML/JSON/etc and hand to [`crate::Context::setup`],
//! validated once at setup rather than threaded through every call.
//! Everything else about engine behavior (timeouts, retry backoff, frame
//! size) is fixed at compile time (`timing` module) per spec §6's "all other
//! behavior is fixed".

use crate::{
    error::{Error, ErrorKind},
    flags::PdFlags,
    reply::{Capability, PdId},
    securechannel::{MasterKey, Scbk},
};
use anomaly::ensure;
use serde::{Deserialize, Serialize};

/// Default per-PD command queue depth, if a [`PdConfig`] does not override
/// it.
pub const DEFAULT_QUEUE_DEPTH: usize = 8;

fn default_queue_depth() -> usize {
    DEFAULT_QUEUE_DEPTH
}

/// Per-PD configuration: identity, timing, and the handful of [`PdFlags`]
/// an embedder (rather than the protocol itself) gets to set up front.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct PdConfig {
    /// This PD's bus address, 0-127 (spec §3 "PD record" identity)
    pub address: u8,

    /// Nominal baud rate of the serial link this PD is reached over. Not
    /// interpreted by the engine; carried for the embedder's channel setup
    /// and reported in diagnostics.
    pub baud_rate: u32,

    /// Capacity of this PD's command queue (spec §4.3).
    #[serde(default = "default_queue_depth")]
    pub queue_depth: usize,

    /// Start this PD in install mode, accepting key-enrollment commands and
    /// falling back to SCBK-D on the first handshake (spec §4.2 `sc_init`).
    #[serde(default)]
    pub install_mode: bool,

    /// Debug escape hatch: accept any sequence number rather than enforcing
    /// the 1,2,3-cycling invariant (spec §3 `SKIP_SEQ_CHECK`).
    #[serde(default)]
    pub skip_seq_check: bool,

    /// This PD's own provisioned Secure Channel base key. Required when
    /// Secure Channel is enabled and this is a PD-role record; ignored for
    /// CP-role records, which derive each peer's SCBK from the master key
    /// instead (spec §4.2 `compute_scbk`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scbk: Option<Scbk>,

    /// This PD's own identification record, reported in response to
    /// `CMD_ID`. Required for a PD-role record; ignored on the CP side,
    /// which learns each peer's identity dynamically from `REPLY_PDID`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<PdId>,

    /// This PD's own capabilities, reported in response to `CMD_CAP`.
    /// Ignored on the CP side.
    #[serde(default)]
    pub capabilities: Vec<Capability>,
}

impl PdConfig {
    fn validate(&self) -> Result<(), Error<ErrorKind>> {
        ensure!(
            self.address <= 0x7F,
            ErrorKind::ConfigInvalid,
            "PD address {} is out of range (0-127)",
            self.address
        );
        ensure!(
            self.queue_depth > 0,
            ErrorKind::ConfigInvalid,
            "PD queue_depth must be nonzero"
        );
        Ok(())
    }

    /// The [`PdFlags`] this config implies at startup, before any protocol
    /// activity has run.
    pub(crate) fn initial_flags(&self) -> PdFlags {
        let mut flags = PdFlags::empty();
        flags.set(PdFlags::INSTALL_MODE, self.install_mode);
        flags.set(PdFlags::SKIP_SEQ_CHECK, self.skip_seq_check);
        flags
    }
}

/// Which role a [`Context`](crate::Context) plays, and the PD record(s) that
/// entails (spec §3 "Context").
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum RoleConfig {
    /// Control Panel: polls N peripheral devices.
    Cp {
        /// One entry per PD this CP talks to, in `offset` order.
        pds: Vec<PdConfig>,
    },
    /// Peripheral Device: this process answers as a single PD.
    Pd {
        /// This device's own identity and timing configuration.
        pd: PdConfig,
    },
}

/// Top-level engine configuration, handed to [`crate::Context::setup`].
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Config {
    /// Enable the Secure Channel (spec §9 "runtime disabled mode"). When
    /// `false`, §4.2 is skipped entirely: no handshake is attempted and
    /// every frame is sent/accepted in the clear.
    #[serde(default)]
    pub secure_channel_enabled: bool,

    /// The CP's 128-bit master key, from which each PD's SCBK is derived
    /// (spec §3 "Context"). Required on the CP side when
    /// `secure_channel_enabled` is set; unused on the PD side.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub master_key: Option<MasterKey>,

    /// The role this `Context` plays and its PD record(s).
    pub role: RoleConfig,
}

impl Config {
    /// Validate this configuration, returning [`ErrorKind::ConfigInvalid`]
    /// on the first problem found (spec §7 "detected at setup; fatal, the
    /// engine does not start").
    pub fn validate(&self) -> Result<(), Error<ErrorKind>> {
        match &self.role {
            RoleConfig::Cp { pds } => {
                ensure!(
                    !pds.is_empty(),
                    ErrorKind::ConfigInvalid,
                    "CP role requires at least one PD"
                );
                for pd in pds {
                    pd.validate()?;
                }
                if self.secure_channel_enabled {
                    ensure!(
                        self.master_key.is_some(),
                        ErrorKind::ConfigInvalid,
                        "secure_channel_enabled requires a master_key on the CP role"
                    );
                }
            }
            RoleConfig::Pd { pd } => {
                pd.validate()?;
                ensure!(
                    pd.id.is_some(),
                    ErrorKind::ConfigInvalid,
                    "PD role requires an identification record"
                );
                if self.secure_channel_enabled {
                    ensure!(
                        pd.scbk.is_some(),
                        ErrorKind::ConfigInvalid,
                        "secure_channel_enabled requires a provisioned scbk on the PD role"
                    );
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pd(address: u8) -> PdConfig {
        PdConfig {
            address,
            baud_rate: 9600,
            queue_depth: 4,
            install_mode: false,
            skip_seq_check: false,
            scbk: None,
            id: None,
            capabilities: Vec::new(),
        }
    }

    #[test]
    fn cp_role_requires_at_least_one_pd() {
        let config = Config {
            secure_channel_enabled: false,
            master_key: None,
            role: RoleConfig::Cp { pds: vec![] },
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn cp_role_with_sc_requires_master_key() {
        let config = Config {
            secure_channel_enabled: true,
            master_key: None,
            role: RoleConfig::Cp { pds: vec![pd(1)] },
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn out_of_range_address_is_rejected() {
        let config = Config {
            secure_channel_enabled: false,
            master_key: None,
            role: RoleConfig::Cp { pds: vec![pd(200)] },
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn well_formed_config_validates() {
        let config = Config {
            secure_channel_enabled: true,
            master_key: Some([0u8; 16]),
            role: RoleConfig::Cp { pds: vec![pd(1), pd(2)] },
        };
        assert!(config.validate().is_ok());
    }
}
