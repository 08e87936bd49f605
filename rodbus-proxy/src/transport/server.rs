use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use rodbus::server::*;
use rodbus::*;

use crate::config::ServerConfig;
use crate::store::{HoldingRegisters, RegisterStore};

/// Register store shared between the local server task and the gateway
pub type SharedRegisters = Arc<Mutex<Box<ProxyRegisters>>>;

/// Holding registers served to local Modbus clients
///
/// Only the holding register functions are supported, everything else is answered with
/// `IllegalFunction`. Addresses outside the store are answered with `IllegalDataAddress`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProxyRegisters {
    registers: HoldingRegisters,
}

impl ProxyRegisters {
    /// Create `size` registers initialized to zero
    pub fn new(size: usize) -> Self {
        Self {
            registers: HoldingRegisters::new(size),
        }
    }

    /// All register values in address order
    pub fn as_slice(&self) -> &[u16] {
        self.registers.as_slice()
    }

    fn fits(&self, range: AddressRange) -> bool {
        usize::from(range.start) + usize::from(range.count) <= self.registers.size()
    }
}

impl RegisterStore for ProxyRegisters {
    fn get(&self, address: u16) -> Option<u16> {
        self.registers.get(address)
    }

    fn set(&mut self, address: u16, value: u16) -> bool {
        self.registers.set(address, value)
    }

    fn size(&self) -> usize {
        self.registers.size()
    }
}

impl RequestHandler for ProxyRegisters {
    fn read_holding_register(&self, address: u16) -> Result<u16, ExceptionCode> {
        self.registers
            .get(address)
            .ok_or(ExceptionCode::IllegalDataAddress)
    }

    fn write_single_register(&mut self, value: Indexed<u16>) -> Result<(), ExceptionCode> {
        if self.registers.set(value.index, value.value) {
            tracing::debug!("local write: {} = {}", value.index, value.value);
            Ok(())
        } else {
            Err(ExceptionCode::IllegalDataAddress)
        }
    }

    fn write_multiple_registers(&mut self, values: WriteRegisters) -> Result<(), ExceptionCode> {
        // all or nothing
        if !self.fits(values.range) {
            return Err(ExceptionCode::IllegalDataAddress);
        }

        tracing::debug!(
            "local write: {} registers at {}",
            values.range.count,
            values.range.start
        );
        for x in values.iterator {
            self.registers.set(x.index, x.value);
        }
        Ok(())
    }
}

/// Lock the shared registers, recovering the data if a previous holder panicked
pub fn lock(registers: &SharedRegisters) -> MutexGuard<'_, Box<ProxyRegisters>> {
    registers.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Spawn the local Modbus TCP server
pub async fn spawn_proxy_server(
    config: &ServerConfig,
    registers: SharedRegisters,
    decode: DecodeLevel,
) -> Result<ServerHandle, std::io::Error> {
    let handle = spawn_tcp_server_task(
        config.max_sessions,
        config.listen,
        ServerHandlerMap::single(UnitId::new(config.unit_id), registers),
        AddressFilter::Any,
        decode,
    )
    .await?;

    tracing::info!(
        "serving {} holding registers on {} with unit id {}",
        config.register_count,
        config.listen,
        config.unit_id
    );
    Ok(handle)
}
