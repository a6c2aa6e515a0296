use crate::{OneWireUartError, Platform, TransferMode, UsartRegisters, wait::Deadline};
use embedded_hal::delay::DelayNs;

/// Byte-at-a-time exchange driven by the engine's status flags.
///
/// Needs neither DMA streams nor an interrupt. Each byte is written, then the
/// driver waits for `TXE` and for the echo to raise `RXNE` before moving to the
/// next one, so the duration grows with the byte count times the bit time.
#[derive(Debug, Default, Clone, Copy)]
pub struct Polling;

impl Polling {
    fn exchange_byte<U: UsartRegisters, D: DelayNs>(
        usart: &mut U,
        deadline: &mut Deadline<'_, D>,
        byte: u8,
    ) -> Result<u8, OneWireUartError> {
        usart.write_data(byte);
        deadline.wait_until(|| usart.status().tx_empty(), core::hint::spin_loop)?;
        deadline.wait_until(|| usart.status().rx_not_empty(), core::hint::spin_loop)?;
        Ok(usart.read_data())
    }
}

impl TransferMode for Polling {
    fn bring_up<U: UsartRegisters, P: Platform>(&mut self, _usart: &U, _platform: &mut P) {}

    fn exchange<U: UsartRegisters, P: Platform, D: DelayNs>(
        &mut self,
        usart: &mut U,
        _platform: &mut P,
        deadline: &mut Deadline<'_, D>,
        tx: &[u8],
        rx: &mut [u8],
    ) -> Result<(), OneWireUartError> {
        for (out, &byte) in rx.iter_mut().zip(tx) {
            *out = Self::exchange_byte(usart, deadline, byte)?;
        }
        Ok(())
    }

    fn exchange_in_place<U: UsartRegisters, P: Platform, D: DelayNs>(
        &mut self,
        usart: &mut U,
        _platform: &mut P,
        deadline: &mut Deadline<'_, D>,
        buf: &mut [u8],
    ) -> Result<(), OneWireUartError> {
        for byte in buf.iter_mut() {
            *byte = Self::exchange_byte(usart, deadline, *byte)?;
        }
        Ok(())
    }

    fn shut_down<P: Platform>(&mut self, _platform: &mut P) {}
}
