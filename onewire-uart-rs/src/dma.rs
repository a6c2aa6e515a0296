use crate::{
    COMPLETION_IRQ_PRIORITY, Channel, Completion, DmaRegisters, OneWireUartError, Platform,
    StreamConfig, StreamFlags, TransferDirection, TransferMode, UsartRegisters,
    registers::MAX_DMA_BLOCK, wait::Deadline,
};
use core::sync::atomic::{Ordering, compiler_fence};
use embedded_hal::delay::DelayNs;

/// Request channel of USART1 on DMA2 streams 2 and 7.
pub const DEFAULT_REQUEST_CHANNEL: u8 = 4;

/// Exchange through two DMA streams, completed by the receive-stream interrupt.
///
/// The transmit stream feeds the engine's data register from memory while the
/// receive stream drains it into memory. Because the bus echoes every bit the
/// receive stream finishes last, and its transfer-complete interrupt (routed
/// to [`on_rx_dma_complete`](crate::on_rx_dma_complete)) ends the exchange.
pub struct Dma<D> {
    dma: D,
    completion: &'static Completion,
    request_channel: u8,
}

impl<D: DmaRegisters> Dma<D> {
    /// Creates a new DMA transfer mode from the controller registers and the
    /// completion shared with the interrupt handler.
    pub fn new(dma: D, completion: &'static Completion) -> Self {
        Self {
            dma,
            completion,
            request_channel: DEFAULT_REQUEST_CHANNEL,
        }
    }

    /// Select the request channel both streams listen to.
    pub fn with_request_channel(mut self, channel: u8) -> Self {
        self.request_channel = channel;
        self
    }

    /// Give back the controller registers.
    pub fn release(self) -> (D, &'static Completion) {
        (self.dma, self.completion)
    }

    fn stream_config(&self, direction: TransferDirection) -> StreamConfig {
        StreamConfig::new()
            .with_channel(self.request_channel)
            .with_direction(direction)
            .with_memory_increment(true)
            .with_peripheral_increment(false)
            .with_circular(false)
            .with_priority(0)
            .with_peripheral_size(0)
            .with_memory_size(0)
    }

    fn run<U: UsartRegisters, P: Platform, T: DelayNs>(
        &mut self,
        usart: &mut U,
        platform: &mut P,
        deadline: &mut Deadline<'_, T>,
        tx_address: usize,
        rx_address: usize,
        len: usize,
    ) -> Result<(), OneWireUartError> {
        let mut offset = 0;
        while offset < len {
            let block = (len - offset).min(MAX_DMA_BLOCK);
            self.run_block(
                usart,
                platform,
                deadline,
                tx_address + offset,
                rx_address + offset,
                block as u16,
            )?;
            offset += block;
        }
        Ok(())
    }

    fn run_block<U: UsartRegisters, P: Platform, T: DelayNs>(
        &mut self,
        usart: &mut U,
        platform: &mut P,
        deadline: &mut Deadline<'_, T>,
        tx_address: usize,
        rx_address: usize,
        len: u16,
    ) -> Result<(), OneWireUartError> {
        // Stale flags would read as a finished block.
        self.dma.clear_flags(Channel::Rx, StreamFlags::ALL);
        self.dma.clear_flags(Channel::Tx, StreamFlags::ALL);

        self.dma.set_transfer_length(Channel::Rx, len);
        self.dma.set_transfer_length(Channel::Tx, len);
        self.dma.set_memory_address(Channel::Rx, rx_address);
        self.dma.set_memory_address(Channel::Tx, tx_address);

        self.completion.reset();

        usart.modify_control3(|r| r.with_dma_rx(true).with_dma_tx(true));
        self.dma
            .modify_stream_config(Channel::Rx, |c| c.with_transfer_complete_irq(true));

        // NOTE(compiler_fence) operations on the buffers must not be reordered
        // after the streams are started
        compiler_fence(Ordering::Release);

        // Receiver first, so the first echo has somewhere to land.
        self.dma
            .modify_stream_config(Channel::Rx, |c| c.with_enable(true));
        self.dma
            .modify_stream_config(Channel::Tx, |c| c.with_enable(true));

        let completion = self.completion;
        let waited = deadline.wait_until(
            || completion.is_done(),
            || platform.wait_for_interrupt(),
        );

        // NOTE(compiler_fence) reads of the receive buffer must not be
        // reordered before the completion was observed
        compiler_fence(Ordering::Acquire);

        if waited.is_err() {
            log::warn!("DMA exchange of {len} bytes did not complete, aborting");
            self.abort();
        }
        usart.modify_control3(|r| r.with_dma_rx(false).with_dma_tx(false));
        waited
    }

    fn abort(&mut self) {
        for channel in [Channel::Tx, Channel::Rx] {
            self.dma
                .modify_stream_config(channel, |c| c.with_enable(false));
        }
        // EN stays set until the stream has finished its current item, and
        // NDTR/M0AR writes are ignored until it reads back clear.
        for channel in [Channel::Tx, Channel::Rx] {
            while self.dma.stream_config(channel).enable() {
                core::hint::spin_loop();
            }
            self.dma.clear_flags(channel, StreamFlags::ALL);
        }
        self.completion.reset();
    }
}

impl<D: DmaRegisters> TransferMode for Dma<D> {
    fn bring_up<U: UsartRegisters, P: Platform>(&mut self, usart: &U, platform: &mut P) {
        let data_register = usart.data_register_address();
        for (channel, direction) in [
            (Channel::Rx, TransferDirection::PeripheralToMemory),
            (Channel::Tx, TransferDirection::MemoryToPeripheral),
        ] {
            let config = self.stream_config(direction);
            self.dma.set_stream_config(channel, config);
            self.dma.set_peripheral_address(channel, data_register);
        }
        platform.enable_interrupt(COMPLETION_IRQ_PRIORITY);
    }

    fn exchange<U: UsartRegisters, P: Platform, T: DelayNs>(
        &mut self,
        usart: &mut U,
        platform: &mut P,
        deadline: &mut Deadline<'_, T>,
        tx: &[u8],
        rx: &mut [u8],
    ) -> Result<(), OneWireUartError> {
        let len = tx.len().min(rx.len());
        self.run(
            usart,
            platform,
            deadline,
            tx.as_ptr() as usize,
            rx.as_mut_ptr() as usize,
            len,
        )
    }

    fn exchange_in_place<U: UsartRegisters, P: Platform, T: DelayNs>(
        &mut self,
        usart: &mut U,
        platform: &mut P,
        deadline: &mut Deadline<'_, T>,
        buf: &mut [u8],
    ) -> Result<(), OneWireUartError> {
        // The transmit stream always reads a byte before its echo is written.
        let address = buf.as_mut_ptr() as usize;
        self.run(usart, platform, deadline, address, address, buf.len())
    }

    fn shut_down<P: Platform>(&mut self, platform: &mut P) {
        platform.disable_interrupt();
        self.abort();
    }
}
