use crate::outcome::{TransactionId, TransactionResult};

/// Connection to the upstream Modbus device as seen by the gateway
///
/// None of the methods may block. Requests are started with [`Upstream::start_read`] or
/// [`Upstream::start_write`] and complete later through [`Upstream::poll_result`], which the
/// gateway drains at the beginning of every tick.
pub trait Upstream {
    /// True while a TCP session to the device exists
    fn is_connected(&self) -> bool;

    /// Begin establishing a session, no-op if one is already being established
    fn connect(&mut self);

    /// Tear down the current session
    fn disconnect(&mut self);

    /// Start reading `count` holding registers beginning at `device_start`
    fn start_read(&mut self, id: TransactionId, device_start: u16, count: u16);

    /// Start writing `values` to consecutive holding registers beginning at `device_start`
    fn start_write(&mut self, id: TransactionId, device_start: u16, values: &[u16]);

    /// Next completed transaction, if any
    fn poll_result(&mut self) -> Option<TransactionResult>;
}
