use std::time::Duration;

/// Timing parameters that pace traffic towards the upstream device
///
/// The defaults suit slow embedded Modbus TCP adapters, e.g. inverter data loggers, that
/// drop or mishandle requests arriving too quickly after a connect or after a previous request.
///
/// Every "hold" below is measured from the moment a transaction completes and is followed by
/// the regular `poll_gap` before anything else is dispatched.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Timing {
    /// Minimum gap between the pacing anchor and the next dispatched transaction
    pub poll_gap: Duration,
    /// An outstanding transaction older than this is abandoned locally
    pub request_timeout: Duration,
    /// Minimum delay between connection attempts, also used as the hold after a failed write
    pub reconnect_delay: Duration,
    /// Quiet period after the TCP session comes up during which nothing is sent
    pub grace_period: Duration,
    /// Hold applied after a transaction was abandoned
    pub soft_recovery_cooldown: Duration,
    /// Hold applied when the device answers with the "server device busy" exception
    pub busy_cooldown: Duration,
    /// Hold applied when the transport reports a response timeout
    pub timeout_cooldown: Duration,
    /// Hold applied after any other failed read
    pub error_cooldown: Duration,
    /// Hold applied after a successful write so the device can settle
    pub write_settle: Duration,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            poll_gap: Duration::from_secs(2),
            request_timeout: Duration::from_secs(10),
            reconnect_delay: Duration::from_secs(10),
            grace_period: Duration::from_secs(5),
            soft_recovery_cooldown: Duration::from_secs(5),
            busy_cooldown: Duration::from_secs(4),
            timeout_cooldown: Duration::from_secs(3),
            error_cooldown: Duration::from_secs(5),
            write_settle: Duration::from_secs(10),
        }
    }
}
