use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use anyhow::{anyhow, bail, Context as _};
use growatt2mqtt::{modbus_wrapper::ModbusWrapper, telemetry::DeviceEndpoint};
use log::debug;
use tokio_modbus::client::sync::{tcp, Context, Reader, Writer};
use tokio_modbus::Slave;

/// Modbus TCP client; every request is bounded by `timeout`.
pub struct TokioModbusWrapper {
    endpoint: DeviceEndpoint,
    timeout: Duration,
    // resolved once, dropped again when a connect attempt fails
    address: Option<SocketAddr>,
    context: Option<Context>,
}

impl TokioModbusWrapper {
    pub fn new(endpoint: &DeviceEndpoint, timeout: Duration) -> Self {
        Self {
            endpoint: endpoint.clone(),
            timeout,
            address: None,
            context: None,
        }
    }

    /// Looks the host up on a helper thread, giving up after the request
    /// timeout.
    fn resolve(&mut self) -> anyhow::Result<SocketAddr> {
        if let Some(address) = self.address {
            return Ok(address);
        }
        let target = (self.endpoint.host.clone(), self.endpoint.port);
        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            // the receiver is gone once the lookup timed out
            let _ = tx.send(target.to_socket_addrs().map(|mut addresses| addresses.next()));
        });
        let address = match rx.recv_timeout(self.timeout) {
            Ok(resolved) => resolved
                .with_context(|| format!("unable to resolve {}", self.endpoint.host))?
                .ok_or_else(|| anyhow!("no address found for {}", self.endpoint.host))?,
            Err(_) => bail!(
                "resolving {} timed out after {:?}",
                self.endpoint.host,
                self.timeout
            ),
        };
        self.address = Some(address);
        Ok(address)
    }

    fn context(&mut self) -> anyhow::Result<&mut Context> {
        self.context
            .as_mut()
            .ok_or_else(|| anyhow!("not connected to {}", self.endpoint))
    }
}

impl ModbusWrapper for TokioModbusWrapper {
    fn connect(&mut self) -> anyhow::Result<()> {
        let address = self.resolve()?;
        let mut context = match tcp::connect_slave_with_timeout(
            address,
            Slave(self.endpoint.unit_id),
            Some(self.timeout),
        ) {
            Ok(context) => context,
            Err(e) => {
                self.address = None;
                return Err(e).with_context(|| format!("connecting to {address}"));
            }
        };
        context.set_timeout(self.timeout);
        debug!("connected to {} ({address})", self.endpoint);
        self.context = Some(context);
        Ok(())
    }

    fn read_holding_registers(&mut self, address: u16, count: u16) -> anyhow::Result<Vec<u16>> {
        Ok(self.context()?.read_holding_registers(address, count)??)
    }

    fn read_input_registers(&mut self, address: u16, count: u16) -> anyhow::Result<Vec<u16>> {
        Ok(self.context()?.read_input_registers(address, count)??)
    }

    fn write_registers(&mut self, address: u16, values: &[u16]) -> anyhow::Result<()> {
        Ok(self.context()?.write_multiple_registers(address, values)??)
    }

    fn close(&mut self) {
        // dropping the context shuts the socket down
        if self.context.take().is_some() {
            debug!("disconnected from {}", self.endpoint);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal_address_is_resolved_once() {
        let endpoint = DeviceEndpoint::new("127.0.0.1", 1502, 1);
        let mut wrapper = TokioModbusWrapper::new(&endpoint, Duration::from_secs(1));
        let address = wrapper.resolve().unwrap();
        assert_eq!(address, SocketAddr::from(([127, 0, 0, 1], 1502)));
        assert_eq!(wrapper.address, Some(address));
    }

    #[test]
    fn unresolvable_host_fails_within_timeout() {
        let endpoint = DeviceEndpoint::new("inverter.invalid", 502, 1);
        let mut wrapper = TokioModbusWrapper::new(&endpoint, Duration::from_millis(500));
        assert!(wrapper.connect().is_err());
        assert!(wrapper.address.is_none());
        assert!(wrapper.context.is_none());
    }

    #[test]
    fn reads_without_connection_fail() {
        let endpoint = DeviceEndpoint::new("127.0.0.1", 502, 1);
        let mut wrapper = TokioModbusWrapper::new(&endpoint, Duration::from_secs(1));
        assert!(wrapper.read_input_registers(0, 1).is_err());
    }
}
