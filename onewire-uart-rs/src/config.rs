use crate::{
    Line, OneWireUart, OneWireUartError, Platform, TransferMode, UsartBaudRate, UsartControl1,
    UsartControl2, UsartControl3, UsartRegisters,
};
use embedded_hal::delay::DelayNs;

/// Alternate function routing USART1 to PA9/PA10.
pub const DEFAULT_ALTERNATE_FUNCTION: u8 = 7;

/// Preemption priority of the receive-complete interrupt.
pub const COMPLETION_IRQ_PRIORITY: u8 = 1;

/// Output driver of a pin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputType {
    /// Drives both levels.
    PushPull,
    /// Only pulls low; the bus pull-up provides the high level.
    OpenDrain,
}

/// Internal pull resistor of a pin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pull {
    /// Floating.
    None,
    /// Pull-up.
    Up,
    /// Pull-down.
    Down,
}

/// Output slew rate of a pin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Speed {
    /// Low speed.
    Low,
    /// Medium speed.
    Medium,
    /// High speed.
    High,
    /// Very high speed.
    VeryHigh,
}

/// Configuration applied to both lines of the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PinConfig {
    /// Alternate function number connecting the pin to the engine.
    pub alternate_function: u8,
    /// Output driver.
    pub output: OutputType,
    /// Pull resistor.
    pub pull: Pull,
    /// Slew rate.
    pub speed: Speed,
}

impl Default for PinConfig {
    fn default() -> Self {
        Self {
            alternate_function: DEFAULT_ALTERNATE_FUNCTION,
            output: OutputType::OpenDrain,
            pull: Pull::None,
            speed: Speed::VeryHigh,
        }
    }
}

/// Configuration state of the transceiver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BusState {
    /// Nothing has been brought up yet.
    #[default]
    Uninitialized,
    /// Clocks, pins, DMA streams and interrupt are wired and the engine
    /// runs at `baud_rate`.
    Configured {
        /// Bits per second.
        baud_rate: u32,
    },
}

impl<U: UsartRegisters, P: Platform, M: TransferMode, D: DelayNs> OneWireUart<U, P, M, D> {
    /// Set the bus signalling rate.
    ///
    /// The first call brings the hardware up: clocks, both pins in
    /// alternate-function open-drain mode, the transfer mode's wiring and the
    /// engine itself. Later calls only stop the engine, reprogram the divisor
    /// against the current peripheral clock and restart it, which is what the
    /// protocol layer does every time it switches between reset timing and
    /// data timing.
    ///
    /// # Errors
    /// [`OneWireUartError::InvalidBaudRate`] if the rate is zero or cannot be
    /// derived from the peripheral clock. Nothing is changed in that case.
    pub fn configure(&mut self, baud_rate: u32) -> Result<(), OneWireUartError> {
        match self.state {
            BusState::Uninitialized => self.bring_up(baud_rate)?,
            BusState::Configured { .. } => self.change_rate(baud_rate)?,
        }
        self.state = BusState::Configured { baud_rate };
        Ok(())
    }

    fn bring_up(&mut self, baud_rate: u32) -> Result<(), OneWireUartError> {
        let brr = UsartBaudRate::for_rate(self.platform.peripheral_clock_hz(), baud_rate)?;
        log::debug!(
            "bringing up 1-Wire engine at {baud_rate} Bd (divisor {})",
            brr.divisor()
        );

        self.platform.enable_clocks();
        self.platform.configure_pin(Line::Tx, self.pins);
        self.platform.configure_pin(Line::Rx, self.pins);
        self.mode.bring_up(&self.usart, &mut self.platform);

        // 8N1, oversampling by 16, no flow control, plain asynchronous mode
        self.usart.set_control1(UsartControl1::new());
        self.usart.set_control2(UsartControl2::new());
        self.usart.set_control3(UsartControl3::new());
        self.usart.set_baud_rate(brr);
        self.usart.set_control1(
            UsartControl1::new()
                .with_tx_enable(true)
                .with_rx_enable(true)
                .with_enable(true),
        );
        Ok(())
    }

    fn change_rate(&mut self, baud_rate: u32) -> Result<(), OneWireUartError> {
        let brr = UsartBaudRate::for_rate(self.platform.peripheral_clock_hz(), baud_rate)?;
        log::debug!(
            "switching 1-Wire engine to {baud_rate} Bd (divisor {})",
            brr.divisor()
        );
        self.usart.modify_control1(|r| r.with_enable(false));
        self.usart.set_baud_rate(brr);
        self.usart.modify_control1(|r| r.with_enable(true));
        Ok(())
    }
}
