#![no_std]
#![deny(missing_docs)]

/*! # onewire-uart
 *
 * Lowest layer of a 1-Wire bus master: a USART whose TX and RX lines are both
 * wired, open-drain, to the single bus conductor. Every byte shifted out is
 * read back as the bus saw it, so one full-duplex exchange of N bytes is all a
 * protocol layer needs to generate reset pulses and read/write time slots. The
 * protocol layer switches the baud rate with [`OneWireUart::configure`] to
 * select between reset timing and bit timing.
 *
 * Two transfer modes share the same contract:
 * - [`Dma`] (feature `dma`, on by default) moves the bytes with two DMA streams
 *   and sleeps until the receive-stream interrupt calls [`on_rx_dma_complete`];
 * - [`Polling`] writes and reads one byte at a time on the engine's status flags.
 *
 * The hardware is reached only through [`UsartRegisters`], [`DmaRegisters`] and
 * [`Platform`]; the `sim` feature provides a loop-back bus implementing all
 * three for host testing.
 */

#[cfg(any(test, feature = "sim"))]
extern crate std;

mod config;
#[cfg(feature = "dma")]
mod completion;
#[cfg(feature = "dma")]
mod dma;
mod error;
mod polling;
mod registers;
#[cfg(any(test, feature = "sim"))]
pub mod sim;
mod traits;
mod wait;

pub use config::{
    BusState, COMPLETION_IRQ_PRIORITY, DEFAULT_ALTERNATE_FUNCTION, OutputType, PinConfig, Pull,
    Speed,
};
#[cfg(feature = "dma")]
pub use completion::{Completion, on_rx_dma_complete};
#[cfg(feature = "dma")]
pub use dma::{DEFAULT_REQUEST_CHANNEL, Dma};
pub use error::OneWireUartError;
pub use polling::Polling;
pub use registers::{
    StreamConfig, StreamFlags, TransferDirection, UsartBaudRate, UsartControl1, UsartControl2,
    UsartControl3, UsartStatus,
};
pub use traits::{Channel, DmaRegisters, Line, Platform, TransferMode, UsartRegisters};
pub use wait::Deadline;

use embedded_hal::delay::DelayNs;

/// Results of transceiver calls.
pub type OneWireUartResult<T> = Result<T, OneWireUartError>;

/// A USART driving a 1-Wire bus in open-drain loop-back.
///
/// Owns the engine registers, the platform services, the transfer mode and a
/// delay provider implementing [`DelayNs`](embedded_hal::delay::DelayNs).
/// Holding the register handles by value is what keeps a second driver off the
/// same peripheral.
pub struct OneWireUart<U, P, M, D> {
    pub(crate) usart: U,
    pub(crate) platform: P,
    pub(crate) mode: M,
    pub(crate) delay: D,
    pub(crate) state: BusState,
    pub(crate) pins: PinConfig,
    pub(crate) timeout_us: Option<u32>,
}

/// Builder for creating a [`OneWireUart`] instance with custom configuration.
#[derive(Debug, Clone, Copy)]
pub struct OneWireUartBuilder {
    pub(crate) pins: PinConfig,
    pub(crate) timeout_us: Option<u32>,
}

impl Default for OneWireUartBuilder {
    fn default() -> Self {
        OneWireUartBuilder {
            pins: PinConfig::default(),
            timeout_us: None,
        }
    }
}

impl OneWireUartBuilder {
    /// Bound every transfer call to `timeout_us` microseconds.
    ///
    /// Without a timeout a stalled bus blocks the caller forever.
    pub fn with_timeout_us(mut self, timeout_us: u32) -> Self {
        self.timeout_us = Some(timeout_us);
        self
    }

    /// Sets the pin configuration used for both lines.
    pub fn with_pin_config(mut self, pins: PinConfig) -> Self {
        self.pins = pins;
        self
    }

    /// Builds a new, not yet configured, [`OneWireUart`].
    ///
    /// No register is touched until the first [`OneWireUart::configure`].
    pub fn build<U, P, M, D>(
        self,
        usart: U,
        platform: P,
        mode: M,
        delay: D,
    ) -> OneWireUart<U, P, M, D>
    where
        U: UsartRegisters,
        P: Platform,
        M: TransferMode,
        D: DelayNs,
    {
        OneWireUart {
            usart,
            platform,
            mode,
            delay,
            state: BusState::Uninitialized,
            pins: self.pins,
            timeout_us: self.timeout_us,
        }
    }
}

impl<U, P, M, D> OneWireUart<U, P, M, D> {
    /// Current configuration state.
    pub fn state(&self) -> BusState {
        self.state
    }

    /// Rate programmed by the last successful [`configure`](OneWireUart::configure).
    pub fn baud_rate(&self) -> Option<u32> {
        match self.state {
            BusState::Uninitialized => None,
            BusState::Configured { baud_rate } => Some(baud_rate),
        }
    }
}

impl<U: UsartRegisters, P: Platform, M: TransferMode, D: DelayNs> OneWireUart<U, P, M, D> {
    /// Exchange `tx.len()` bytes over the bus.
    ///
    /// Byte `i` of `tx` is shifted out while byte `i` of `rx` is sampled from
    /// the same wire. Returns once every byte has been exchanged; `rx` beyond
    /// `tx.len()` is left untouched. An empty `tx` returns at once.
    ///
    /// # Errors
    /// - [`OneWireUartError::NotConfigured`] before the first [`configure`](OneWireUart::configure).
    /// - [`OneWireUartError::BufferTooShort`] if `rx` is shorter than `tx`.
    /// - [`OneWireUartError::Timeout`] if a timeout was set and the bus stalled.
    pub fn transfer(&mut self, tx: &[u8], rx: &mut [u8]) -> OneWireUartResult<()> {
        self.ensure_configured()?;
        if rx.len() < tx.len() {
            return Err(OneWireUartError::BufferTooShort {
                required: tx.len(),
                available: rx.len(),
            });
        }
        if tx.is_empty() {
            return Ok(());
        }
        log::trace!("exchanging {} bytes", tx.len());
        let rx = &mut rx[..tx.len()];
        let mut deadline = wait::Deadline::new(&mut self.delay, self.timeout_us);
        self.mode
            .exchange(&mut self.usart, &mut self.platform, &mut deadline, tx, rx)
    }

    /// Exchange `buf` over the bus, replacing every byte with what was read back.
    ///
    /// # Errors
    /// As [`transfer`](OneWireUart::transfer), minus the buffer length check.
    pub fn transfer_in_place(&mut self, buf: &mut [u8]) -> OneWireUartResult<()> {
        self.ensure_configured()?;
        if buf.is_empty() {
            return Ok(());
        }
        log::trace!("exchanging {} bytes in place", buf.len());
        let mut deadline = wait::Deadline::new(&mut self.delay, self.timeout_us);
        self.mode
            .exchange_in_place(&mut self.usart, &mut self.platform, &mut deadline, buf)
    }

    /// Stop the engine, mask the interrupt and hand the resources back.
    pub fn release(mut self) -> (U, P, M, D) {
        if let BusState::Configured { .. } = self.state {
            self.usart.modify_control1(|r| r.with_enable(false));
            self.mode.shut_down(&mut self.platform);
        }
        (self.usart, self.platform, self.mode, self.delay)
    }

    fn ensure_configured(&self) -> OneWireUartResult<()> {
        match self.state {
            BusState::Uninitialized => Err(OneWireUartError::NotConfigured),
            BusState::Configured { .. } => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests;
