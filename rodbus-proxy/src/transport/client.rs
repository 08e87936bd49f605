use std::net::IpAddr;
use std::time::Duration;

use rodbus::client::*;
use rodbus::*;
use tokio::sync::{mpsc, watch};

use crate::config::DeviceConfig;
use crate::outcome::{Outcome, TransactionId, TransactionResult};
use crate::upstream::Upstream;

/// Number of requests the channel accepts before callers have to wait
const MAX_QUEUED_REQUESTS: usize = 4;

impl From<RequestError> for Outcome {
    fn from(err: RequestError) -> Self {
        match err {
            RequestError::ResponseTimeout => Outcome::ResponseTimeout,
            RequestError::Exception(ExceptionCode::ServerDeviceBusy) => Outcome::DeviceBusy,
            other => Outcome::Failed(other.to_string()),
        }
    }
}

/// Publishes every channel state change into a watch channel
struct StateListener {
    tx: watch::Sender<ClientState>,
}

impl StateListener {
    fn create() -> (Self, watch::Receiver<ClientState>) {
        let (tx, rx) = watch::channel(ClientState::Disabled);
        (Self { tx }, rx)
    }
}

impl Listener<ClientState> for StateListener {
    fn update(&mut self, state: ClientState) -> MaybeAsync<()> {
        tracing::debug!("channel state: {state:?}");
        self.tx.send_replace(state);
        MaybeAsync::ready(())
    }
}

/// [`Upstream`] implemented over a rodbus TCP client channel
///
/// Every transaction runs on its own Tokio task and reports its result through an
/// unbounded channel, so none of the trait methods block. Must be used from within a Tokio
/// runtime.
pub struct RodbusUpstream {
    channel: Channel,
    param: RequestParam,
    state: watch::Receiver<ClientState>,
    enabled: bool,
    tx: mpsc::UnboundedSender<TransactionResult>,
    rx: mpsc::UnboundedReceiver<TransactionResult>,
}

impl RodbusUpstream {
    /// Spawn the client channel, initially disabled
    ///
    /// * `response_timeout` - how long a single request waits for its response
    /// * `reconnect_delay` - fixed pause of the channel between failed connection attempts
    pub fn spawn(
        device: &DeviceConfig,
        response_timeout: Duration,
        reconnect_delay: Duration,
        decode: DecodeLevel,
    ) -> Self {
        let (listener, state) = StateListener::create();
        let channel = spawn_tcp_client_task(
            host_addr(device),
            MAX_QUEUED_REQUESTS,
            doubling_retry_strategy(reconnect_delay, reconnect_delay),
            decode,
            Some(Box::new(listener)),
        );
        let (tx, rx) = mpsc::unbounded_channel();

        Self {
            channel,
            param: RequestParam::new(UnitId::new(device.unit_id), response_timeout),
            state,
            enabled: false,
            tx,
            rx,
        }
    }

    /// Last state reported by the channel
    pub fn state(&self) -> ClientState {
        *self.state.borrow()
    }
}

impl Upstream for RodbusUpstream {
    fn is_connected(&self) -> bool {
        self.enabled && self.state() == ClientState::Connected
    }

    fn connect(&mut self) {
        if self.enabled {
            // the channel retries on its own while enabled
            return;
        }
        self.enabled = true;
        let channel = self.channel.clone();
        tokio::spawn(async move {
            if let Err(err) = channel.enable().await {
                tracing::warn!("unable to enable channel: {err}");
            }
        });
    }

    fn disconnect(&mut self) {
        self.enabled = false;
        let channel = self.channel.clone();
        tokio::spawn(async move {
            if let Err(err) = channel.disable().await {
                tracing::warn!("unable to disable channel: {err}");
            }
        });
    }

    fn start_read(&mut self, id: TransactionId, device_start: u16, count: u16) {
        let mut channel = self.channel.clone();
        let param = self.param;
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let result = match AddressRange::try_from(device_start, count) {
                Ok(range) => match channel.read_holding_registers(param, range).await {
                    Ok(values) => {
                        TransactionResult::read(id, values.into_iter().map(|x| x.value).collect())
                    }
                    Err(err) => TransactionResult::failed(id, err.into()),
                },
                Err(err) => TransactionResult::failed(id, Outcome::Failed(err.to_string())),
            };
            // the receiver only goes away together with the upstream
            let _ = tx.send(result);
        });
    }

    fn start_write(&mut self, id: TransactionId, device_start: u16, values: &[u16]) {
        let mut channel = self.channel.clone();
        let param = self.param;
        let tx = self.tx.clone();
        let values = values.to_vec();
        tokio::spawn(async move {
            let result = match WriteMultiple::from(device_start, values) {
                Ok(request) => match channel.write_multiple_registers(param, request).await {
                    Ok(_) => TransactionResult::written(id),
                    Err(err) => TransactionResult::failed(id, err.into()),
                },
                Err(err) => TransactionResult::failed(id, RequestError::from(err).into()),
            };
            let _ = tx.send(result);
        });
    }

    fn poll_result(&mut self) -> Option<TransactionResult> {
        self.rx.try_recv().ok()
    }
}

fn host_addr(device: &DeviceConfig) -> HostAddr {
    match device.host.parse::<IpAddr>() {
        Ok(ip) => HostAddr::ip(ip, device.port),
        Err(_) => HostAddr::dns(device.host.clone(), device.port),
    }
}
