use crate::{Channel, DmaRegisters, StreamFlags};
use core::sync::atomic::{AtomicBool, Ordering};

/// End-of-exchange signal shared between the receive-DMA interrupt and the
/// blocked caller.
///
/// The caller resets it before arming a transfer; the interrupt sets it once
/// the last byte has landed in memory. Place it in a `static` so both sides
/// can reach it:
///
/// ```ignore
/// static COMPLETION: Completion = Completion::new();
///
/// #[interrupt]
/// fn DMA2_STREAM2() {
///     let mut dma = unsafe { BoardDma::steal() };
///     onewire_uart::on_rx_dma_complete(&mut dma, &COMPLETION);
/// }
/// ```
#[derive(Debug)]
pub struct Completion {
    done: AtomicBool,
}

impl Completion {
    /// A pending completion.
    pub const fn new() -> Self {
        Self {
            done: AtomicBool::new(false),
        }
    }

    /// Whether the receive stream has finished.
    pub fn is_done(&self) -> bool {
        self.done.load(Ordering::Acquire)
    }

    pub(crate) fn reset(&self) {
        self.done.store(false, Ordering::Release);
    }

    pub(crate) fn signal(&self) {
        self.done.store(true, Ordering::Release);
    }
}

impl Default for Completion {
    fn default() -> Self {
        Self::new()
    }
}

/// Body of the receive-stream transfer-complete interrupt.
///
/// Marks the exchange done, then acknowledges every flag of the receive
/// stream so the interrupt does not fire again. The transmit stream is left
/// alone.
pub fn on_rx_dma_complete<D: DmaRegisters>(dma: &mut D, completion: &Completion) {
    completion.signal();
    dma.clear_flags(Channel::Rx, StreamFlags::ALL);
}
