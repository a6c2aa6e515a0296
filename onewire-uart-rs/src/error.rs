use core::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// 1-Wire UART transceiver errors.
pub enum OneWireUartError {
    /// The requested baud rate is zero, or the peripheral clock cannot
    /// be divided down to it.
    InvalidBaudRate(u32),
    /// A transfer was requested before the first successful
    /// [`configure`](crate::OneWireUart::configure).
    NotConfigured,
    /// The receive buffer cannot hold one byte per transmitted byte.
    BufferTooShort {
        /// Bytes to be exchanged.
        required: usize,
        /// Capacity of the receive buffer.
        available: usize,
    },
    /// The bus did not finish the exchange before the configured timeout.
    Timeout,
}

impl fmt::Display for OneWireUartError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidBaudRate(baud) => write!(f, "baud rate {baud} is not attainable"),
            Self::NotConfigured => f.write_str("transceiver used before configuration"),
            Self::BufferTooShort {
                required,
                available,
            } => write!(
                f,
                "receive buffer holds {available} bytes, {required} required"
            ),
            Self::Timeout => f.write_str("bus exchange timed out"),
        }
    }
}

impl core::error::Error for OneWireUartError {}
