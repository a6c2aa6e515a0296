//! Register images of the USART engine and of one DMA stream.
//!
//! Layouts follow the STM32F4 reference manual (RM0090), sections 30.6 (USART)
//! and 10.5 (DMA). Only the images travel through the [`UsartRegisters`](crate::UsartRegisters)
//! and [`DmaRegisters`](crate::DmaRegisters) seams; the actual memory-mapped access is
//! left to the implementor.

use crate::OneWireUartError;
use bitfield_struct::bitfield;

/// Smallest divisor the engine accepts when oversampling by 16.
pub(crate) const MIN_DIVISOR: u32 = 16;
/// Largest divisor that fits the mantissa and fraction fields.
pub(crate) const MAX_DIVISOR: u32 = 0xffff;
/// Largest item count one DMA stream can move in a single block.
#[cfg(feature = "dma")]
pub(crate) const MAX_DMA_BLOCK: usize = 0xffff;

/// USART status register (`USART_SR`).
#[bitfield(u32)]
#[derive(PartialEq, Eq)]
pub struct UsartStatus {
    /// Parity error.
    pub parity_error: bool,
    /// Framing error.
    pub framing_error: bool,
    /// Noise detected on the line.
    pub noise: bool,
    /// Overrun error.
    pub overrun: bool,
    /// Idle line detected.
    pub idle: bool,
    /// Read data register not empty (`RXNE`).
    ///
    /// Set when the shift register has moved a received byte into the data
    /// register. Cleared by reading the data register.
    pub rx_not_empty: bool,
    /// Transmission complete.
    pub tx_complete: bool,
    /// Transmit data register empty (`TXE`).
    ///
    /// Set when the byte written to the data register has been moved into
    /// the shift register. Cleared by a write to the data register.
    pub tx_empty: bool,
    /// LIN break detected.
    pub lin_break: bool,
    /// CTS toggled.
    pub cts: bool,
    #[bits(22)]
    __r1: u32,
}

/// USART control register 1 (`USART_CR1`).
#[bitfield(u32)]
#[derive(PartialEq, Eq)]
pub struct UsartControl1 {
    /// Send break.
    pub send_break: bool,
    /// Receiver wake-up.
    pub receiver_wakeup: bool,
    /// Receiver enable.
    pub rx_enable: bool,
    /// Transmitter enable.
    pub tx_enable: bool,
    /// IDLE interrupt enable.
    pub idle_irq: bool,
    /// RXNE interrupt enable.
    pub rx_not_empty_irq: bool,
    /// Transmission complete interrupt enable.
    pub tx_complete_irq: bool,
    /// TXE interrupt enable.
    pub tx_empty_irq: bool,
    /// Parity error interrupt enable.
    pub parity_error_irq: bool,
    /// Odd parity when set.
    pub parity_odd: bool,
    /// Parity control enable.
    pub parity_enable: bool,
    /// Wake-up on address mark.
    pub wake_address: bool,
    /// Nine data bits when set, eight otherwise.
    pub word_length_9: bool,
    /// Engine enable (`UE`). Baud rate may only be changed while cleared.
    pub enable: bool,
    __r2: bool,
    /// Oversampling by 8 when set, by 16 otherwise.
    pub oversampling_8: bool,
    #[bits(16)]
    __r3: u32,
}

/// USART control register 2 (`USART_CR2`).
#[bitfield(u32)]
#[derive(PartialEq, Eq)]
pub struct UsartControl2 {
    /// Node address for multiprocessor mode.
    #[bits(4)]
    pub address: u8,
    __r4: bool,
    /// 11-bit break detection when set.
    pub lin_break_length: bool,
    /// LIN break interrupt enable.
    pub lin_break_irq: bool,
    __r5: bool,
    /// Last bit clock pulse.
    pub last_bit_clock: bool,
    /// Clock phase.
    pub clock_phase: bool,
    /// Clock polarity.
    pub clock_polarity: bool,
    /// Synchronous clock output enable.
    pub clock_enable: bool,
    /// Stop bits: `0` = 1, `1` = 0.5, `2` = 2, `3` = 1.5.
    #[bits(2)]
    pub stop_bits: u8,
    /// LIN mode enable.
    pub lin_enable: bool,
    #[bits(17)]
    __r6: u32,
}

/// USART control register 3 (`USART_CR3`).
#[bitfield(u32)]
#[derive(PartialEq, Eq)]
pub struct UsartControl3 {
    /// Error interrupt enable.
    pub error_irq: bool,
    /// IrDA mode enable.
    pub irda_enable: bool,
    /// IrDA low-power.
    pub irda_low_power: bool,
    /// Single-wire half-duplex selection.
    pub half_duplex: bool,
    /// Smartcard NACK enable.
    pub smartcard_nack: bool,
    /// Smartcard mode enable.
    pub smartcard_enable: bool,
    /// DMA request on received data (`DMAR`).
    pub dma_rx: bool,
    /// DMA request on transmit data register empty (`DMAT`).
    pub dma_tx: bool,
    /// RTS flow control.
    pub rts_enable: bool,
    /// CTS flow control.
    pub cts_enable: bool,
    /// CTS interrupt enable.
    pub cts_irq: bool,
    /// One sample bit method.
    pub one_bit_sampling: bool,
    #[bits(20)]
    __r7: u32,
}

/// USART baud rate register (`USART_BRR`).
///
/// With oversampling by 16 the register holds `USARTDIV * 16`, i.e. the
/// integral divisor of the peripheral clock, split into a 12-bit mantissa
/// and a 4-bit fraction.
#[bitfield(u32)]
#[derive(PartialEq, Eq)]
pub struct UsartBaudRate {
    /// Fractional part of `USARTDIV`, in sixteenths.
    #[bits(4)]
    pub fraction: u8,
    /// Integral part of `USARTDIV`.
    #[bits(12)]
    pub mantissa: u16,
    #[bits(16)]
    __r8: u32,
}

impl UsartBaudRate {
    /// Compute the divisor of `pclk_hz` for `baud_rate`, rounded to nearest.
    ///
    /// # Errors
    /// [`OneWireUartError::InvalidBaudRate`] when the rate is zero or the
    /// divisor falls outside `16..=0xffff`.
    pub fn for_rate(pclk_hz: u32, baud_rate: u32) -> Result<Self, OneWireUartError> {
        if baud_rate == 0 {
            return Err(OneWireUartError::InvalidBaudRate(baud_rate));
        }
        let divisor = (pclk_hz as u64 + baud_rate as u64 / 2) / baud_rate as u64;
        if divisor < MIN_DIVISOR as u64 || divisor > MAX_DIVISOR as u64 {
            return Err(OneWireUartError::InvalidBaudRate(baud_rate));
        }
        Ok(Self::from_bits(divisor as u32))
    }

    /// The divisor as programmed.
    pub fn divisor(&self) -> u32 {
        self.into_bits() & MAX_DIVISOR
    }

    /// Baud rate this divisor produces from `pclk_hz`.
    pub fn baud_rate(&self, pclk_hz: u32) -> u32 {
        match self.divisor() {
            0 => 0,
            div => pclk_hz / div,
        }
    }
}

/// Direction of a DMA stream (`DIR` field).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TransferDirection {
    /// Data register into memory.
    PeripheralToMemory = 0,
    /// Memory into the data register.
    MemoryToPeripheral = 1,
    /// Memory to memory.
    MemoryToMemory = 2,
}

impl TransferDirection {
    const fn into_bits(self) -> u8 {
        self as _
    }

    const fn from_bits(value: u8) -> Self {
        match value {
            0 => Self::PeripheralToMemory,
            1 => Self::MemoryToPeripheral,
            _ => Self::MemoryToMemory,
        }
    }
}

/// DMA stream configuration register (`DMA_SxCR`).
#[bitfield(u32)]
#[derive(PartialEq, Eq)]
pub struct StreamConfig {
    /// Stream enable. Cleared by hardware at the end of a block.
    pub enable: bool,
    /// Direct mode error interrupt enable.
    pub direct_mode_error_irq: bool,
    /// Transfer error interrupt enable.
    pub transfer_error_irq: bool,
    /// Half transfer interrupt enable.
    pub half_transfer_irq: bool,
    /// Transfer complete interrupt enable.
    pub transfer_complete_irq: bool,
    /// Peripheral flow controller.
    pub peripheral_flow_control: bool,
    /// Data transfer direction.
    #[bits(2, default = TransferDirection::PeripheralToMemory)]
    pub direction: TransferDirection,
    /// Circular mode.
    pub circular: bool,
    /// Peripheral address increment.
    pub peripheral_increment: bool,
    /// Memory address increment.
    pub memory_increment: bool,
    /// Peripheral item size: `0` = byte, `1` = half-word, `2` = word.
    #[bits(2)]
    pub peripheral_size: u8,
    /// Memory item size: `0` = byte, `1` = half-word, `2` = word.
    #[bits(2)]
    pub memory_size: u8,
    /// Peripheral increment offset size.
    pub peripheral_increment_offset: bool,
    /// Stream priority: `0` = low up to `3` = very high.
    #[bits(2)]
    pub priority: u8,
    /// Double buffer mode.
    pub double_buffer: bool,
    /// Current target in double buffer mode.
    pub current_target: bool,
    __r9: bool,
    /// Peripheral burst transfer configuration.
    #[bits(2)]
    pub peripheral_burst: u8,
    /// Memory burst transfer configuration.
    #[bits(2)]
    pub memory_burst: u8,
    /// Request channel selection.
    #[bits(3)]
    pub channel: u8,
    #[bits(4)]
    __r10: u8,
}

/// Interrupt flags of one DMA stream.
///
/// The controller packs four such groups into each of `LISR`/`HISR` (and the
/// matching clear registers); the [`DmaRegisters`](crate::DmaRegisters)
/// implementor shifts them into place.
#[bitfield(u8)]
#[derive(PartialEq, Eq)]
pub struct StreamFlags {
    /// FIFO error.
    pub fifo_error: bool,
    __r11: bool,
    /// Direct mode error.
    pub direct_mode_error: bool,
    /// Transfer error.
    pub transfer_error: bool,
    /// Half transfer.
    pub half_transfer: bool,
    /// Transfer complete.
    pub transfer_complete: bool,
    #[bits(2)]
    __r12: u8,
}

impl StreamFlags {
    /// Every flag of the group.
    pub const ALL: Self = Self::new()
        .with_fifo_error(true)
        .with_direct_mode_error(true)
        .with_transfer_error(true)
        .with_half_transfer(true)
        .with_transfer_complete(true);

    /// No flag is raised.
    pub fn is_clear(&self) -> bool {
        self.into_bits() & Self::ALL.into_bits() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn divisor_for_reset_and_data_rates() {
        let brr = UsartBaudRate::for_rate(84_000_000, 9600).unwrap();
        assert_eq!(brr.divisor(), 8750);
        assert_eq!(brr.mantissa(), 546);
        assert_eq!(brr.fraction(), 14);

        let brr = UsartBaudRate::for_rate(84_000_000, 115_200).unwrap();
        assert_eq!(brr.divisor(), 729);
        assert_eq!(brr.baud_rate(84_000_000), 115_226);
    }

    #[test]
    fn divisor_rounds_to_nearest() {
        // 16 MHz / 115200 = 138.9
        assert_eq!(
            UsartBaudRate::for_rate(16_000_000, 115_200).unwrap().divisor(),
            139
        );
    }

    #[test]
    fn unattainable_rates_are_rejected() {
        assert_eq!(
            UsartBaudRate::for_rate(84_000_000, 0),
            Err(OneWireUartError::InvalidBaudRate(0))
        );
        assert_eq!(
            UsartBaudRate::for_rate(16_000_000, 2_000_000),
            Err(OneWireUartError::InvalidBaudRate(2_000_000))
        );
        assert_eq!(
            UsartBaudRate::for_rate(180_000_000, 300),
            Err(OneWireUartError::InvalidBaudRate(300))
        );
    }

    #[test]
    fn stream_flag_group_layout() {
        assert_eq!(StreamFlags::ALL.into_bits(), 0b0011_1101);
        assert!(StreamFlags::new().is_clear());
        assert!(!StreamFlags::new().with_half_transfer(true).is_clear());
    }

    #[test]
    fn stream_config_fields() {
        let cfg = StreamConfig::new()
            .with_channel(4)
            .with_direction(TransferDirection::MemoryToPeripheral)
            .with_memory_increment(true);
        assert_eq!(cfg.into_bits(), (4 << 25) | (1 << 10) | (1 << 6));
        assert_eq!(
            StreamConfig::from_bits(2 << 6).direction(),
            TransferDirection::MemoryToMemory
        );
    }

    #[test]
    fn control_register_bits() {
        assert_eq!(UsartControl1::new().with_enable(true).into_bits(), 1 << 13);
        assert_eq!(UsartControl3::new().with_dma_tx(true).into_bits(), 1 << 7);
        assert_eq!(UsartStatus::new().with_tx_empty(true).into_bits(), 1 << 7);
    }
}
