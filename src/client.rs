//! High-level client API.
//!
//! [`ModbusClient`] wraps the engine with one typed method per function code
//! plus the lifecycle operations. [`ModbusTcpClient`] and
//! [`ModbusSerialClient`] are the two concrete instantiations.

use std::time::Duration;

use tokio::sync::mpsc::UnboundedReceiver;

use crate::connection::{ConnectionEvent, ConnectionState, ModbusEngine};
use crate::constants::{MAX_READ_COILS, MAX_READ_REGISTERS};
use crate::error::{ModbusError, ModbusResult};
use crate::function::{FunctionCode, Request, RequestKind, RequestOptions, Response, ResponseValue};
use crate::transaction::TransactionMode;
#[cfg(feature = "rtu")]
use crate::transport::{SerialConfig, SerialTransport};
use crate::transport::{TcpConfig, TcpTransport, Transport};

/// Modbus TCP client.
pub type ModbusTcpClient = ModbusClient<TcpTransport>;

/// Modbus serial RTU client.
#[cfg(feature = "rtu")]
pub type ModbusSerialClient = ModbusClient<SerialTransport>;

/// A Modbus master over any [`Transport`].
pub struct ModbusClient<T: Transport> {
    engine: ModbusEngine<T>,
    events: Option<UnboundedReceiver<ConnectionEvent>>,
}

impl ModbusClient<TcpTransport> {
    /// TCP client without automatic reconnection.
    pub fn tcp(host: impl Into<String>, port: u16) -> Self {
        Self::tcp_with(TcpConfig::new(host, port), None)
    }

    /// TCP client with full configuration. `auto_reconnect` is the retry
    /// interval applied after an unexpected connection loss.
    pub fn tcp_with(config: TcpConfig, auto_reconnect: Option<Duration>) -> Self {
        let (engine, events) = ModbusEngine::new(
            TcpTransport::new(config),
            TransactionMode::Tcp,
            auto_reconnect,
        );
        Self {
            engine,
            events: Some(events),
        }
    }
}

#[cfg(feature = "rtu")]
impl ModbusClient<SerialTransport> {
    /// Serial RTU client without automatic reconnection.
    pub fn serial(config: SerialConfig) -> Self {
        Self::serial_with(config, None)
    }

    /// Serial RTU client with a reconnect interval.
    pub fn serial_with(config: SerialConfig, auto_reconnect: Option<Duration>) -> Self {
        let (engine, events) = ModbusEngine::new(
            SerialTransport::new(config),
            TransactionMode::Serial,
            auto_reconnect,
        );
        Self {
            engine,
            events: Some(events),
        }
    }
}

impl<T: Transport> ModbusClient<T> {
    pub async fn connect(&self) -> ModbusResult<()> {
        self.engine.connect().await
    }

    pub async fn disconnect(&self) -> ModbusResult<()> {
        self.engine.disconnect().await
    }

    pub async fn reconnect(&self) -> ModbusResult<()> {
        self.engine.reconnect().await
    }

    pub async fn state(&self) -> ConnectionState {
        self.engine.state().await
    }

    pub async fn is_connected(&self) -> bool {
        self.engine.is_connected().await
    }

    pub async fn pending_count(&self) -> usize {
        self.engine.pending_count().await
    }

    /// Take the connection event stream. Yields `None` after the first call.
    pub fn events(&mut self) -> Option<UnboundedReceiver<ConnectionEvent>> {
        self.events.take()
    }

    /// Send a prebuilt request. The typed methods below cover the common
    /// cases; this is the escape hatch.
    pub async fn execute(&self, request: Request) -> ModbusResult<Response> {
        self.engine.request(request).await
    }

    async fn read_bits(
        &self,
        function: FunctionCode,
        address: u16,
        length: u16,
        options: RequestOptions,
    ) -> ModbusResult<Vec<bool>> {
        let request = Request::new(
            function,
            address,
            RequestKind::Read {
                quantity: length.min(MAX_READ_COILS),
            },
            options,
        )?;
        self.engine.request(request).await?.value.into_bits()
    }

    async fn read_words(
        &self,
        function: FunctionCode,
        address: u16,
        length: u16,
        options: RequestOptions,
    ) -> ModbusResult<Vec<i32>> {
        let request = Request::new(
            function,
            address,
            RequestKind::Read {
                quantity: length.min(MAX_READ_REGISTERS),
            },
            options,
        )?;
        self.engine.request(request).await?.value.into_registers()
    }

    /// Read coils (0x01). Lengths beyond 2000 are clamped.
    pub async fn read_coils(
        &self,
        address: u16,
        length: u16,
        options: RequestOptions,
    ) -> ModbusResult<Vec<bool>> {
        self.read_bits(FunctionCode::ReadCoils, address, length, options)
            .await
    }

    /// Read discrete inputs (0x02). Lengths beyond 2000 are clamped.
    pub async fn read_discrete_inputs(
        &self,
        address: u16,
        length: u16,
        options: RequestOptions,
    ) -> ModbusResult<Vec<bool>> {
        self.read_bits(FunctionCode::ReadDiscreteInputs, address, length, options)
            .await
    }

    /// Read holding registers (0x03). Lengths beyond 125 are clamped. Values
    /// are sign-extended 16-bit by default; set `unsigned` in the options for
    /// 0..=65535.
    pub async fn read_holding_registers(
        &self,
        address: u16,
        length: u16,
        options: RequestOptions,
    ) -> ModbusResult<Vec<i32>> {
        self.read_words(FunctionCode::ReadHoldingRegisters, address, length, options)
            .await
    }

    /// Read input registers (0x04). Lengths beyond 125 are clamped.
    pub async fn read_input_registers(
        &self,
        address: u16,
        length: u16,
        options: RequestOptions,
    ) -> ModbusResult<Vec<i32>> {
        self.read_words(FunctionCode::ReadInputRegisters, address, length, options)
            .await
    }

    /// Write a single coil (0x05). Returns the echoed state.
    pub async fn write_single_coil(
        &self,
        address: u16,
        value: bool,
        options: RequestOptions,
    ) -> ModbusResult<bool> {
        let request = Request::new(
            FunctionCode::WriteSingleCoil,
            address,
            RequestKind::WriteCoil(value),
            options,
        )?;
        match self.engine.request(request).await?.value {
            ResponseValue::CoilEcho { value, .. } => Ok(value),
            other => Err(ModbusError::protocol(format!(
                "Expected coil echo, got {other:?}"
            ))),
        }
    }

    /// Write a single holding register (0x06). Returns the echoed value.
    pub async fn write_single_register(
        &self,
        address: u16,
        value: u16,
        options: RequestOptions,
    ) -> ModbusResult<u16> {
        let request = Request::new(
            FunctionCode::WriteSingleRegister,
            address,
            RequestKind::WriteRegister(value),
            options,
        )?;
        match self.engine.request(request).await?.value {
            ResponseValue::RegisterEcho { value, .. } => Ok(value),
            other => Err(ModbusError::protocol(format!(
                "Expected register echo, got {other:?}"
            ))),
        }
    }

    async fn write_block(&self, request: Request) -> ModbusResult<u16> {
        match self.engine.request(request).await?.value {
            ResponseValue::MultiWriteEcho { quantity, .. } => Ok(quantity),
            other => Err(ModbusError::protocol(format!(
                "Expected write echo, got {other:?}"
            ))),
        }
    }

    /// Write a block of coils (0x0F). Returns the echoed coil count.
    pub async fn write_multiple_coils(
        &self,
        address: u16,
        values: Vec<bool>,
        options: RequestOptions,
    ) -> ModbusResult<u16> {
        let request = Request::new(
            FunctionCode::WriteMultipleCoils,
            address,
            RequestKind::WriteCoils(values),
            options,
        )?;
        self.write_block(request).await
    }

    /// Write a block of registers (0x10). Returns the echoed register count.
    pub async fn write_multiple_registers(
        &self,
        address: u16,
        values: Vec<u16>,
        options: RequestOptions,
    ) -> ModbusResult<u16> {
        let request = Request::new(
            FunctionCode::WriteMultipleRegisters,
            address,
            RequestKind::WriteRegisters(values),
            options,
        )?;
        self.write_block(request).await
    }

    /// Force `length` consecutive coils to the same state (0x0F).
    pub async fn write_multiple_coils_same_value(
        &self,
        address: u16,
        value: bool,
        length: u16,
        options: RequestOptions,
    ) -> ModbusResult<u16> {
        self.write_multiple_coils(address, vec![value; length as usize], options)
            .await
    }

    /// Set `length` consecutive registers to the same value (0x10).
    pub async fn write_multiple_registers_same_value(
        &self,
        address: u16,
        value: u16,
        length: u16,
        options: RequestOptions,
    ) -> ModbusResult<u16> {
        self.write_multiple_registers(address, vec![value; length as usize], options)
            .await
    }
}
