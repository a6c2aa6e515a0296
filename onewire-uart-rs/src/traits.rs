use crate::{
    OneWireUartError, PinConfig, StreamConfig, StreamFlags, UsartBaudRate, UsartControl1,
    UsartControl2, UsartControl3, UsartStatus, wait::Deadline,
};
use embedded_hal::delay::DelayNs;

/// Register access to the USART engine driving the bus.
///
/// Implement this over the peripheral access crate of the target. Every
/// method maps to a single volatile access of the named register.
pub trait UsartRegisters {
    /// Read `SR`.
    fn status(&mut self) -> UsartStatus;
    /// Read `CR1`.
    fn control1(&mut self) -> UsartControl1;
    /// Write `CR1`.
    fn set_control1(&mut self, value: UsartControl1);
    /// Write `CR2`.
    fn set_control2(&mut self, value: UsartControl2);
    /// Read `CR3`.
    fn control3(&mut self) -> UsartControl3;
    /// Write `CR3`.
    fn set_control3(&mut self, value: UsartControl3);
    /// Write `BRR`.
    fn set_baud_rate(&mut self, value: UsartBaudRate);
    /// Read the low byte of `DR`.
    fn read_data(&mut self) -> u8;
    /// Write one byte to `DR`.
    fn write_data(&mut self, byte: u8);
    /// Bus address of `DR`, the fixed peripheral side of both DMA streams.
    fn data_register_address(&self) -> usize;

    /// Read-modify-write `CR1`.
    fn modify_control1(&mut self, f: impl FnOnce(UsartControl1) -> UsartControl1) {
        let value = f(self.control1());
        self.set_control1(value);
    }

    /// Read-modify-write `CR3`.
    fn modify_control3(&mut self, f: impl FnOnce(UsartControl3) -> UsartControl3) {
        let value = f(self.control3());
        self.set_control3(value);
    }
}

/// The two DMA streams bound to the engine's data register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    /// Memory to `DR`.
    Tx,
    /// `DR` to memory.
    Rx,
}

/// Register access to the DMA controller streams serving the engine.
///
/// The implementor maps [`Channel::Tx`] and [`Channel::Rx`] to physical
/// streams (stream 7 and stream 2 of DMA2 for USART1 on STM32F4).
pub trait DmaRegisters {
    /// Read `SxCR`.
    fn stream_config(&mut self, channel: Channel) -> StreamConfig;
    /// Write `SxCR`.
    fn set_stream_config(&mut self, channel: Channel, value: StreamConfig);
    /// Write `SxNDTR`.
    fn set_transfer_length(&mut self, channel: Channel, len: u16);
    /// Write `SxPAR`.
    fn set_peripheral_address(&mut self, channel: Channel, address: usize);
    /// Write `SxM0AR`.
    fn set_memory_address(&mut self, channel: Channel, address: usize);
    /// Read the stream's flag group from `LISR`/`HISR`.
    fn flags(&mut self, channel: Channel) -> StreamFlags;
    /// Clear the given flags through `LIFCR`/`HIFCR`.
    fn clear_flags(&mut self, channel: Channel, flags: StreamFlags);

    /// Read-modify-write `SxCR`.
    fn modify_stream_config(
        &mut self,
        channel: Channel,
        f: impl FnOnce(StreamConfig) -> StreamConfig,
    ) {
        let value = f(self.stream_config(channel));
        self.set_stream_config(channel, value);
    }
}

/// The two I/O lines of the engine, tied together on the bus wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Line {
    /// Engine output.
    Tx,
    /// Engine input.
    Rx,
}

/// Board services the transceiver consumes but does not own.
pub trait Platform {
    /// Gate on the clocks of both GPIO ports, the DMA controller and the engine.
    fn enable_clocks(&mut self);
    /// Program one line's pin.
    fn configure_pin(&mut self, line: Line, config: PinConfig);
    /// Read the clock tree and return the engine's kernel clock in Hz.
    fn peripheral_clock_hz(&mut self) -> u32;
    /// Unmask the receive-complete interrupt at the given preemption priority.
    fn enable_interrupt(&mut self, priority: u8);
    /// Mask the receive-complete interrupt.
    fn disable_interrupt(&mut self);
    /// Idle until the next interrupt (`WFI`).
    fn wait_for_interrupt(&mut self) {
        core::hint::spin_loop();
    }
}

/// A way of moving bytes over the bus.
///
/// Implemented by [`Polling`](crate::Polling) and, with the `dma` feature,
/// [`Dma`](crate::Dma). The driver is generic over this trait, so the choice
/// is fixed when the firmware is built.
pub trait TransferMode {
    /// One-time wiring performed during the first configuration.
    fn bring_up<U: UsartRegisters, P: Platform>(&mut self, usart: &U, platform: &mut P);

    /// Exchange `tx` for `rx`, byte for byte. Both have the same length.
    fn exchange<U: UsartRegisters, P: Platform, D: DelayNs>(
        &mut self,
        usart: &mut U,
        platform: &mut P,
        deadline: &mut Deadline<'_, D>,
        tx: &[u8],
        rx: &mut [u8],
    ) -> Result<(), OneWireUartError>;

    /// Exchange `buf` in place: every byte is sent and replaced by its echo.
    fn exchange_in_place<U: UsartRegisters, P: Platform, D: DelayNs>(
        &mut self,
        usart: &mut U,
        platform: &mut P,
        deadline: &mut Deadline<'_, D>,
        buf: &mut [u8],
    ) -> Result<(), OneWireUartError>;

    /// Undo [`bring_up`](TransferMode::bring_up).
    fn shut_down<P: Platform>(&mut self, platform: &mut P);
}
