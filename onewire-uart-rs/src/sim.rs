//! A simulated open-drain loop-back bus.
//!
//! [`SimBus`] models the USART engine, the two DMA streams, the interrupt line
//! and the clock tree closely enough to run the driver unmodified on the host.
//! The wire is the wired-AND of the transmitted byte and whatever the attached
//! responder pulls low; with no responder every byte echoes back unchanged.
//!
//! Simulated hardware only moves when the driver idles: on
//! [`Platform::wait_for_interrupt`], on a [`DelayNs`] call, or on a polled
//! write to the data register.
//!
//! A stream disabled in the middle of a block keeps reading back `EN` set
//! once more before it stops, and ignores `NDTR` and `M0AR` writes until
//! then, as the DMA controller does while it drains its current item.
//!
//! The stream handles dereference whatever memory addresses they are given.
//! Only the driver may program the simulated streams: a [`SimDma`] pointed at
//! memory that does not outlive the exchange is undefined behaviour the moment
//! the bus advances.

use crate::{
    Channel, DmaRegisters, Line, PinConfig, Platform, StreamConfig, StreamFlags, UsartBaudRate,
    UsartControl1, UsartControl2, UsartControl3, UsartRegisters, UsartStatus,
};
use embedded_hal::delay::DelayNs;
use std::{boxed::Box, cell::RefCell, rc::Rc};

/// Address reported for the engine's data register (`USART1_DR` on STM32F4).
pub const DATA_REGISTER_ADDRESS: usize = 0x4001_1004;

/// Bits on the wire per byte: start, eight data, stop.
const FRAME_BITS: u64 = 10;

type Responder = Box<dyn FnMut(u32, u8) -> u8>;
type Handler = Box<dyn FnMut(&mut SimDma)>;

/// Counters of everything the driver asked of the simulated hardware.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SimStats {
    /// Calls to [`Platform::enable_clocks`].
    pub clock_enables: usize,
    /// Calls to [`Platform::configure_pin`].
    pub pin_configurations: usize,
    /// Writes of a stream's peripheral address.
    pub dma_wirings: usize,
    /// Calls to [`Platform::enable_interrupt`].
    pub interrupt_enables: usize,
    /// Receive-complete interrupts raised.
    pub interrupts: usize,
    /// Bytes that crossed the wire.
    pub bytes: usize,
    /// Wire time of those bytes, in nanoseconds.
    pub bus_time_ns: u64,
    /// Nanoseconds spent in [`DelayNs`].
    pub delayed_ns: u64,
    /// Transmit stream started while the receive stream was still off.
    pub start_order_faults: usize,
    /// Reads of `SxCR` that found a disabled stream still draining.
    pub disable_waits: usize,
    /// `NDTR` or `M0AR` writes dropped because the stream was still enabled.
    pub writes_while_enabled: usize,
    /// Baud rate the last byte was shifted at.
    pub last_baud_rate: Option<u32>,
}

#[derive(Debug, Default, Clone, Copy)]
struct SimStream {
    config: StreamConfig,
    length: u16,
    peripheral: usize,
    memory: usize,
    flags: StreamFlags,
    draining: bool,
}

impl SimStream {
    fn reads_enabled(&self) -> bool {
        self.config.enable() || self.draining
    }
}

struct SimState {
    pclk_hz: u32,
    cr1: UsartControl1,
    cr3: UsartControl3,
    brr: UsartBaudRate,
    tx_empty: bool,
    rx_data: Option<u8>,
    streams: [SimStream; 2],
    pins: [Option<PinConfig>; 2],
    interrupt: Option<u8>,
    stalled: bool,
    responder: Option<Responder>,
    stats: SimStats,
}

const fn stream_index(channel: Channel) -> usize {
    match channel {
        Channel::Tx => 0,
        Channel::Rx => 1,
    }
}

const fn line_index(line: Line) -> usize {
    match line {
        Line::Tx => 0,
        Line::Rx => 1,
    }
}

impl SimState {
    fn engine_ready(&self) -> bool {
        !self.stalled && self.cr1.enable() && self.cr1.tx_enable() && self.cr1.rx_enable()
    }

    /// Shift one byte through the wire and return what the receiver sampled.
    fn shift(&mut self, byte: u8) -> u8 {
        let baud = self.brr.baud_rate(self.pclk_hz);
        let pulled = match self.responder.as_mut() {
            Some(responder) => responder(baud, byte),
            None => 0xff,
        };
        self.stats.bytes += 1;
        if baud > 0 {
            self.stats.bus_time_ns += FRAME_BITS * 1_000_000_000 / baud as u64;
        }
        self.stats.last_baud_rate = Some(baud);
        byte & pulled
    }

    /// Run any armed DMA exchange to completion. Returns whether the
    /// receive-complete interrupt fires.
    fn advance(&mut self) -> bool {
        let tx = self.streams[stream_index(Channel::Tx)];
        let rx = self.streams[stream_index(Channel::Rx)];
        let armed = tx.config.enable()
            && rx.config.enable()
            && self.cr3.dma_tx()
            && self.cr3.dma_rx();
        if !armed || !self.engine_ready() {
            return false;
        }

        let len = tx.length.min(rx.length) as usize;
        for i in 0..len {
            // SAFETY: the driver programmed both addresses from buffers it
            // keeps borrowed until the exchange completes.
            let byte = unsafe { (tx.memory as *const u8).add(i).read() };
            let echo = self.shift(byte);
            unsafe { (rx.memory as *mut u8).add(i).write(echo) };
        }

        let done = StreamFlags::new()
            .with_half_transfer(true)
            .with_transfer_complete(true);
        for stream in self.streams.iter_mut() {
            stream.length -= len as u16;
            stream.config.set_enable(false);
            stream.flags = StreamFlags::from_bits(stream.flags.into_bits() | done.into_bits());
        }
        rx.config.transfer_complete_irq() && self.interrupt.is_some()
    }
}

struct Shared {
    state: RefCell<SimState>,
    handler: RefCell<Option<Handler>>,
}

/// The simulated bus and the factory of its register handles.
///
/// # Safety
///
/// The bus reads and writes the memory its streams were pointed at. Hand the
/// [`SimDma`] handle to the driver and leave stream programming to it.
#[derive(Clone)]
pub struct SimBus {
    shared: Rc<Shared>,
}

impl SimBus {
    /// A powered-down bus whose engine is clocked at `pclk_hz`.
    pub fn new(pclk_hz: u32) -> Self {
        let state = SimState {
            pclk_hz,
            cr1: UsartControl1::new(),
            cr3: UsartControl3::new(),
            brr: UsartBaudRate::new(),
            tx_empty: true,
            rx_data: None,
            streams: [SimStream::default(); 2],
            pins: [None; 2],
            interrupt: None,
            stalled: false,
            responder: None,
            stats: SimStats::default(),
        };
        Self {
            shared: Rc::new(Shared {
                state: RefCell::new(state),
                handler: RefCell::new(None),
            }),
        }
    }

    /// Engine register handle.
    pub fn usart(&self) -> SimUsart {
        SimUsart {
            shared: self.shared.clone(),
        }
    }

    /// DMA controller handle.
    pub fn dma(&self) -> SimDma {
        SimDma {
            shared: self.shared.clone(),
        }
    }

    /// Platform services handle.
    pub fn platform(&self) -> SimPlatform {
        SimPlatform {
            shared: self.shared.clone(),
        }
    }

    /// Delay provider advancing the simulation.
    pub fn delay(&self) -> SimDelay {
        SimDelay {
            shared: self.shared.clone(),
        }
    }

    /// Install the receive-complete interrupt handler.
    pub fn on_rx_complete(&self, handler: impl FnMut(&mut SimDma) + 'static) {
        *self.shared.handler.borrow_mut() = Some(Box::new(handler));
    }

    /// Route the receive-complete interrupt to
    /// [`on_rx_dma_complete`](crate::on_rx_dma_complete) for `completion`.
    #[cfg(feature = "dma")]
    pub fn attach_completion(&self, completion: &'static crate::Completion) {
        self.on_rx_complete(move |dma| crate::on_rx_dma_complete(dma, completion));
    }

    /// Attach a device model. It sees the current baud rate and the
    /// transmitted byte and returns the bits it leaves released (`1`).
    pub fn set_responder(&self, responder: impl FnMut(u32, u8) -> u8 + 'static) {
        self.shared.state.borrow_mut().responder = Some(Box::new(responder));
    }

    /// Freeze or release the wire. A frozen wire never completes a byte.
    pub fn set_stalled(&self, stalled: bool) {
        let mut state = self.shared.state.borrow_mut();
        state.stalled = stalled;
        if !stalled {
            state.tx_empty = true;
        }
    }

    /// Retune the clock tree.
    pub fn set_peripheral_clock_hz(&self, pclk_hz: u32) {
        self.shared.state.borrow_mut().pclk_hz = pclk_hz;
    }

    /// Raise flags of a stream, as a hardware event would.
    pub fn raise_flags(&self, channel: Channel, flags: StreamFlags) {
        let mut state = self.shared.state.borrow_mut();
        let stream = &mut state.streams[stream_index(channel)];
        stream.flags = StreamFlags::from_bits(stream.flags.into_bits() | flags.into_bits());
    }

    /// Counters so far.
    pub fn stats(&self) -> SimStats {
        self.shared.state.borrow().stats
    }

    /// Current `CR1`.
    pub fn control1(&self) -> UsartControl1 {
        self.shared.state.borrow().cr1
    }

    /// Current `CR3`.
    pub fn control3(&self) -> UsartControl3 {
        self.shared.state.borrow().cr3
    }

    /// Current `BRR`.
    pub fn baud_rate_register(&self) -> UsartBaudRate {
        self.shared.state.borrow().brr
    }

    /// Current `SxCR` of a stream.
    pub fn stream_config(&self, channel: Channel) -> StreamConfig {
        let stream = self.shared.state.borrow().streams[stream_index(channel)];
        stream.config.with_enable(stream.reads_enabled())
    }

    /// Current `SxPAR` of a stream.
    pub fn stream_peripheral_address(&self, channel: Channel) -> usize {
        self.shared.state.borrow().streams[stream_index(channel)].peripheral
    }

    /// Configuration last applied to a pin.
    pub fn pin_config(&self, line: Line) -> Option<PinConfig> {
        self.shared.state.borrow().pins[line_index(line)]
    }

    /// Priority of the receive-complete interrupt, if unmasked.
    pub fn interrupt_priority(&self) -> Option<u8> {
        self.shared.state.borrow().interrupt
    }

    fn step(shared: &Rc<Shared>) {
        let fire = shared.state.borrow_mut().advance();
        if !fire {
            return;
        }
        shared.state.borrow_mut().stats.interrupts += 1;
        let handler = shared.handler.borrow_mut().take();
        if let Some(mut handler) = handler {
            handler(&mut SimDma {
                shared: shared.clone(),
            });
            let mut slot = shared.handler.borrow_mut();
            if slot.is_none() {
                *slot = Some(handler);
            }
        }
    }
}

/// Simulated engine registers.
pub struct SimUsart {
    shared: Rc<Shared>,
}

impl UsartRegisters for SimUsart {
    fn status(&mut self) -> UsartStatus {
        let state = self.shared.state.borrow();
        UsartStatus::new()
            .with_tx_empty(state.tx_empty)
            .with_tx_complete(state.tx_empty)
            .with_rx_not_empty(state.rx_data.is_some())
    }

    fn control1(&mut self) -> UsartControl1 {
        self.shared.state.borrow().cr1
    }

    fn set_control1(&mut self, value: UsartControl1) {
        self.shared.state.borrow_mut().cr1 = value;
    }

    fn set_control2(&mut self, _value: UsartControl2) {}

    fn control3(&mut self) -> UsartControl3 {
        self.shared.state.borrow().cr3
    }

    fn set_control3(&mut self, value: UsartControl3) {
        self.shared.state.borrow_mut().cr3 = value;
    }

    fn set_baud_rate(&mut self, value: UsartBaudRate) {
        self.shared.state.borrow_mut().brr = value;
    }

    fn read_data(&mut self) -> u8 {
        self.shared.state.borrow_mut().rx_data.take().unwrap_or(0)
    }

    fn write_data(&mut self, byte: u8) {
        let mut state = self.shared.state.borrow_mut();
        if state.engine_ready() {
            let echo = state.shift(byte);
            state.rx_data = Some(echo);
            state.tx_empty = true;
        } else {
            state.tx_empty = false;
        }
    }

    fn data_register_address(&self) -> usize {
        DATA_REGISTER_ADDRESS
    }
}

/// Simulated DMA controller.
///
/// Memory addresses written to a stream are dereferenced when the bus
/// advances; see the [module documentation](self).
pub struct SimDma {
    shared: Rc<Shared>,
}

impl DmaRegisters for SimDma {
    fn stream_config(&mut self, channel: Channel) -> StreamConfig {
        let mut state = self.shared.state.borrow_mut();
        let stream = state.streams[stream_index(channel)];
        if stream.draining {
            state.streams[stream_index(channel)].draining = false;
            state.stats.disable_waits += 1;
        }
        stream.config.with_enable(stream.reads_enabled())
    }

    fn set_stream_config(&mut self, channel: Channel, value: StreamConfig) {
        let mut state = self.shared.state.borrow_mut();
        let current = state.streams[stream_index(channel)];
        let starting = value.enable() && !current.reads_enabled();
        if starting
            && channel == Channel::Tx
            && !state.streams[stream_index(Channel::Rx)].reads_enabled()
        {
            state.stats.start_order_faults += 1;
        }
        let stream = &mut state.streams[stream_index(channel)];
        stream.draining = current.reads_enabled() && !value.enable();
        stream.config = value;
    }

    fn set_transfer_length(&mut self, channel: Channel, len: u16) {
        let mut state = self.shared.state.borrow_mut();
        if state.streams[stream_index(channel)].reads_enabled() {
            state.stats.writes_while_enabled += 1;
            return;
        }
        state.streams[stream_index(channel)].length = len;
    }

    fn set_peripheral_address(&mut self, channel: Channel, address: usize) {
        let mut state = self.shared.state.borrow_mut();
        state.streams[stream_index(channel)].peripheral = address;
        state.stats.dma_wirings += 1;
    }

    fn set_memory_address(&mut self, channel: Channel, address: usize) {
        let mut state = self.shared.state.borrow_mut();
        if state.streams[stream_index(channel)].reads_enabled() {
            state.stats.writes_while_enabled += 1;
            return;
        }
        state.streams[stream_index(channel)].memory = address;
    }

    fn flags(&mut self, channel: Channel) -> StreamFlags {
        self.shared.state.borrow().streams[stream_index(channel)].flags
    }

    fn clear_flags(&mut self, channel: Channel, flags: StreamFlags) {
        let mut state = self.shared.state.borrow_mut();
        let stream = &mut state.streams[stream_index(channel)];
        stream.flags = StreamFlags::from_bits(stream.flags.into_bits() & !flags.into_bits());
    }
}

/// Simulated clock tree, pin mux and interrupt controller.
pub struct SimPlatform {
    shared: Rc<Shared>,
}

impl Platform for SimPlatform {
    fn enable_clocks(&mut self) {
        self.shared.state.borrow_mut().stats.clock_enables += 1;
    }

    fn configure_pin(&mut self, line: Line, config: PinConfig) {
        let mut state = self.shared.state.borrow_mut();
        state.pins[line_index(line)] = Some(config);
        state.stats.pin_configurations += 1;
    }

    fn peripheral_clock_hz(&mut self) -> u32 {
        self.shared.state.borrow().pclk_hz
    }

    fn enable_interrupt(&mut self, priority: u8) {
        let mut state = self.shared.state.borrow_mut();
        state.interrupt = Some(priority);
        state.stats.interrupt_enables += 1;
    }

    fn disable_interrupt(&mut self) {
        self.shared.state.borrow_mut().interrupt = None;
    }

    fn wait_for_interrupt(&mut self) {
        SimBus::step(&self.shared);
    }
}

/// Simulated delay provider.
pub struct SimDelay {
    shared: Rc<Shared>,
}

impl DelayNs for SimDelay {
    fn delay_ns(&mut self, ns: u32) {
        self.shared.state.borrow_mut().stats.delayed_ns += ns as u64;
        SimBus::step(&self.shared);
    }
}
