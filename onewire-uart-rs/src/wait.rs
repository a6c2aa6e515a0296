use crate::OneWireUartError;
use embedded_hal::delay::DelayNs;

/// Interval between checks of a bounded wait.
pub(crate) const POLL_INTERVAL_US: u32 = 10;

/// The time budget of one transfer call.
///
/// Without a timeout every wait spins until its condition holds, however long
/// that takes. With a timeout the budget is shared by all waits of the call
/// and is consumed in [`POLL_INTERVAL_US`] steps of the delay provider.
pub struct Deadline<'a, D> {
    delay: &'a mut D,
    remaining_us: Option<u32>,
}

impl<'a, D: DelayNs> Deadline<'a, D> {
    pub(crate) fn new(delay: &'a mut D, timeout_us: Option<u32>) -> Self {
        Self {
            delay,
            remaining_us: timeout_us,
        }
    }

    /// Block until `done` holds.
    ///
    /// `idle` runs between checks of an unbounded wait; a bounded wait sleeps
    /// on the delay provider instead.
    ///
    /// # Errors
    /// [`OneWireUartError::Timeout`] once the budget is spent.
    pub fn wait_until(
        &mut self,
        mut done: impl FnMut() -> bool,
        mut idle: impl FnMut(),
    ) -> Result<(), OneWireUartError> {
        loop {
            if done() {
                return Ok(());
            }
            match self.remaining_us.as_mut() {
                None => idle(),
                Some(0) => return Err(OneWireUartError::Timeout),
                Some(remaining) => {
                    let step = (*remaining).min(POLL_INTERVAL_US);
                    self.delay.delay_us(step);
                    *remaining -= step;
                }
            }
        }
    }
}
