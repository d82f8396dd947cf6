//! Macros used by this crate

/// Write consistent `debug!(...)` lines tagged with a PD's address
macro_rules! pd_debug {
    ($pd:expr, $msg:expr) => {
        debug!("pd[{}] {}", $pd.address(), $msg);
    };
    ($pd:expr, $fmt:expr, $($arg:tt)+) => {
        debug!(concat!("pd[{}] ", $fmt), $pd.address(), $($arg)+);
    };
}

/// Write consistent `warn!(...)` lines tagged with a PD's address
macro_rules! pd_warn {
    ($pd:expr, $msg:expr) => {
        warn!("pd[{}] {}", $pd.address(), $msg);
    };
    ($pd:expr, $fmt:expr, $($arg:tt)+) => {
        warn!(concat!("pd[{}] ", $fmt), $pd.address(), $($arg)+);
    };
}

/// Write consistent `debug!(...)` lines tagged with a CP peer's offset
macro_rules! peer_debug {
    ($peer:expr, $msg:expr) => {
        debug!("peer[{}] {}", $peer.offset(), $msg);
    };
    ($peer:expr, $fmt:expr, $($arg:tt)+) => {
        debug!(concat!("peer[{}] ", $fmt), $peer.offset(), $($arg)+);
    };
}

/// Write consistent `warn!(...)` lines tagged with a CP peer's offset
macro_rules! peer_warn {
    ($peer:expr, $msg:expr) => {
        warn!("peer[{}] {}", $peer.offset(), $msg);
    };
    ($peer:expr, $fmt:expr, $($arg:tt)+) => {
        warn!(concat!("peer[{}] ", $fmt), $peer.offset(), $($arg)+);
    };
}
