use super::*;
use crate::sim::{SimBus, SimPlatform, SimUsart};
use embedded_hal_mock::eh1::delay::NoopDelay;
use rand::{Rng, SeedableRng, rngs::StdRng};
use std::{vec, vec::Vec};

const PCLK_HZ: u32 = 84_000_000;
const RESET_BAUD: u32 = 9600;
const DATA_BAUD: u32 = 115_200;

type SimUart<M, D> = OneWireUart<SimUsart, SimPlatform, M, D>;

fn polling_uart(bus: &SimBus) -> SimUart<Polling, NoopDelay> {
    OneWireUartBuilder::default().build(bus.usart(), bus.platform(), Polling, NoopDelay::new())
}

#[cfg(feature = "dma")]
fn completion() -> &'static Completion {
    std::boxed::Box::leak(std::boxed::Box::new(Completion::new()))
}

#[cfg(feature = "dma")]
fn dma_uart(
    bus: &SimBus,
    builder: OneWireUartBuilder,
) -> (SimUart<Dma<sim::SimDma>, sim::SimDelay>, &'static Completion) {
    let completion = completion();
    bus.attach_completion(completion);
    let mode = Dma::new(bus.dma(), completion);
    let uart = builder.build(bus.usart(), bus.platform(), mode, bus.delay());
    (uart, completion)
}

/// A device that answers reset pulses with a presence pulse and otherwise
/// pulls a few bits low depending on what it hears.
fn chatty_device(baud: u32, byte: u8) -> u8 {
    if baud < 20_000 {
        if byte == 0xf0 { 0xe0 } else { 0xff }
    } else {
        byte.rotate_left(3) | 0x81
    }
}

fn random_bytes(rng: &mut StdRng, max_len: usize) -> Vec<u8> {
    let mut bytes = vec![0; rng.random_range(0..=max_len)];
    rng.fill(&mut bytes[..]);
    bytes
}

fn run_scenario<M: TransferMode, D: DelayNs>(uart: &mut SimUart<M, D>) {
    uart.configure(RESET_BAUD).unwrap();
    let mut buf = [0; 1];
    uart.transfer(&[0xf0], &mut buf).unwrap();
    assert_eq!(buf, [0xf0]);

    uart.configure(DATA_BAUD).unwrap();
    let mut buf3 = [0; 3];
    uart.transfer(&[0x01, 0x02, 0x03], &mut buf3).unwrap();
    assert_eq!(buf3, [0x01, 0x02, 0x03]);
}

fn assert_echo<M: TransferMode, D: DelayNs>(uart: &mut SimUart<M, D>, rng: &mut StdRng) {
    uart.configure(DATA_BAUD).unwrap();
    for _ in 0..50 {
        let tx = random_bytes(rng, 64);
        let mut rx = vec![0; tx.len()];
        uart.transfer(&tx, &mut rx).unwrap();
        assert_eq!(rx, tx);
    }
}

#[cfg(feature = "dma")]
fn exchange_all<M: TransferMode, D: DelayNs>(
    uart: &mut SimUart<M, D>,
    frames: &[(u32, Vec<u8>)],
) -> Vec<Vec<u8>> {
    frames
        .iter()
        .map(|(baud, tx)| {
            uart.configure(*baud).unwrap();
            let mut rx = vec![0; tx.len()];
            uart.transfer(tx, &mut rx).unwrap();
            rx
        })
        .collect()
}

#[test]
fn polling_end_to_end() {
    let bus = SimBus::new(PCLK_HZ);
    run_scenario(&mut polling_uart(&bus));
    assert_eq!(bus.stats().bytes, 4);
}

#[test]
fn polling_echoes_random_sequences() {
    let bus = SimBus::new(PCLK_HZ);
    assert_echo(&mut polling_uart(&bus), &mut StdRng::seed_from_u64(7));
}

#[test]
fn transfer_requires_configuration() {
    let bus = SimBus::new(PCLK_HZ);
    let mut uart = polling_uart(&bus);
    let mut rx = [0; 1];
    assert_eq!(
        uart.transfer(&[0xff], &mut rx),
        Err(OneWireUartError::NotConfigured)
    );
    assert_eq!(
        uart.transfer_in_place(&mut rx),
        Err(OneWireUartError::NotConfigured)
    );
    assert_eq!(bus.stats().bytes, 0);
}

#[test]
fn short_receive_buffer_is_rejected() {
    let bus = SimBus::new(PCLK_HZ);
    let mut uart = polling_uart(&bus);
    uart.configure(DATA_BAUD).unwrap();
    let mut rx = [0; 2];
    assert_eq!(
        uart.transfer(&[1, 2, 3], &mut rx),
        Err(OneWireUartError::BufferTooShort {
            required: 3,
            available: 2
        })
    );
    assert_eq!(bus.stats().bytes, 0);
}

#[test]
fn receive_tail_is_left_alone() {
    let bus = SimBus::new(PCLK_HZ);
    let mut uart = polling_uart(&bus);
    uart.configure(DATA_BAUD).unwrap();
    let mut rx = [0x55; 4];
    uart.transfer(&[0x12, 0x34], &mut rx).unwrap();
    assert_eq!(rx, [0x12, 0x34, 0x55, 0x55]);
}

#[test]
fn first_configuration_needs_a_valid_rate() {
    let bus = SimBus::new(PCLK_HZ);
    let mut uart = polling_uart(&bus);
    assert_eq!(
        uart.configure(0),
        Err(OneWireUartError::InvalidBaudRate(0))
    );
    assert_eq!(uart.state(), BusState::Uninitialized);
    assert_eq!(bus.stats().clock_enables, 0);
    assert_eq!(bus.stats().pin_configurations, 0);
}

#[test]
fn rejected_rate_keeps_previous_configuration() {
    let bus = SimBus::new(PCLK_HZ);
    let mut uart = polling_uart(&bus);
    uart.configure(RESET_BAUD).unwrap();
    let brr = bus.baud_rate_register();

    assert_eq!(
        uart.configure(10_000_000),
        Err(OneWireUartError::InvalidBaudRate(10_000_000))
    );
    assert_eq!(uart.baud_rate(), Some(RESET_BAUD));
    assert_eq!(bus.baud_rate_register(), brr);
    assert!(bus.control1().enable());
}

#[test]
fn bring_up_programs_open_drain_lines_and_8n1() {
    let bus = SimBus::new(PCLK_HZ);
    let mut uart = polling_uart(&bus);
    uart.configure(RESET_BAUD).unwrap();

    for line in [Line::Tx, Line::Rx] {
        let pin = bus.pin_config(line).unwrap();
        assert_eq!(pin.output, OutputType::OpenDrain);
        assert_eq!(pin.pull, Pull::None);
        assert_eq!(pin.alternate_function, DEFAULT_ALTERNATE_FUNCTION);
    }
    let cr1 = bus.control1();
    assert!(cr1.enable() && cr1.tx_enable() && cr1.rx_enable());
    assert!(!cr1.word_length_9() && !cr1.parity_enable() && !cr1.oversampling_8());
    assert_eq!(bus.baud_rate_register().divisor(), 8750);
    // Polled exchanges need neither streams nor the interrupt.
    assert_eq!(bus.stats().dma_wirings, 0);
    assert_eq!(bus.interrupt_priority(), None);
}

#[test]
fn custom_pin_configuration_is_applied() {
    let bus = SimBus::new(PCLK_HZ);
    let pins = PinConfig {
        alternate_function: 8,
        speed: Speed::High,
        ..PinConfig::default()
    };
    let mut uart = OneWireUartBuilder::default().with_pin_config(pins).build(
        bus.usart(),
        bus.platform(),
        Polling,
        NoopDelay::new(),
    );
    uart.configure(RESET_BAUD).unwrap();
    assert_eq!(bus.pin_config(Line::Tx), Some(pins));
    assert_eq!(bus.pin_config(Line::Rx), Some(pins));
}

#[test]
fn rate_change_uses_current_peripheral_clock() {
    let bus = SimBus::new(PCLK_HZ);
    let mut uart = polling_uart(&bus);
    uart.configure(DATA_BAUD).unwrap();
    assert_eq!(bus.baud_rate_register().divisor(), 729);

    bus.set_peripheral_clock_hz(42_000_000);
    uart.configure(DATA_BAUD).unwrap();
    assert_eq!(bus.baud_rate_register().divisor(), 365);
}

#[test]
fn bus_time_follows_programmed_rate() {
    let bus = SimBus::new(PCLK_HZ);
    let mut uart = polling_uart(&bus);

    uart.configure(RESET_BAUD).unwrap();
    uart.transfer(&[0xf0], &mut [0]).unwrap();
    let slow = bus.stats();
    assert_eq!(slow.last_baud_rate, Some(9600));
    assert_eq!(slow.bus_time_ns, 1_041_666);

    uart.configure(DATA_BAUD).unwrap();
    uart.transfer(&[0xff], &mut [0]).unwrap();
    let fast = bus.stats();
    assert_eq!(fast.last_baud_rate, Some(115_226));
    assert_eq!(fast.bus_time_ns - slow.bus_time_ns, 86_785);
}

#[test]
fn in_place_exchange_replaces_with_bus_level() {
    let bus = SimBus::new(PCLK_HZ);
    bus.set_responder(chatty_device);
    let mut uart = polling_uart(&bus);
    uart.configure(RESET_BAUD).unwrap();
    let mut buf = [0xf0];
    uart.transfer_in_place(&mut buf).unwrap();
    assert_eq!(buf, [0xe0]);
}

#[test]
fn polling_times_out_on_stalled_bus() {
    let bus = SimBus::new(PCLK_HZ);
    let mut uart = OneWireUartBuilder::default()
        .with_timeout_us(500)
        .build(bus.usart(), bus.platform(), Polling, bus.delay());
    uart.configure(DATA_BAUD).unwrap();

    bus.set_stalled(true);
    assert_eq!(
        uart.transfer(&[0xff], &mut [0]),
        Err(OneWireUartError::Timeout)
    );
    assert_eq!(bus.stats().delayed_ns, 500_000);

    bus.set_stalled(false);
    let mut rx = [0; 2];
    uart.transfer(&[0xaa, 0x55], &mut rx).unwrap();
    assert_eq!(rx, [0xaa, 0x55]);
}

#[test]
fn release_stops_engine() {
    let bus = SimBus::new(PCLK_HZ);
    let mut uart = polling_uart(&bus);
    uart.configure(RESET_BAUD).unwrap();
    let _ = uart.release();
    assert!(!bus.control1().enable());
}

#[cfg(feature = "dma")]
mod dma {
    use super::*;
    use crate::sim::DATA_REGISTER_ADDRESS;

    #[test]
    fn end_to_end() {
        let bus = SimBus::new(PCLK_HZ);
        let (mut uart, _) = dma_uart(&bus, OneWireUartBuilder::default());
        run_scenario(&mut uart);
        assert_eq!(bus.stats().bytes, 4);
        assert_eq!(bus.stats().interrupts, 2);
    }

    #[test]
    fn end_to_end_without_timeout() {
        let bus = SimBus::new(PCLK_HZ);
        let completion = completion();
        bus.attach_completion(completion);
        let mut uart = OneWireUartBuilder::default().build(
            bus.usart(),
            bus.platform(),
            Dma::new(bus.dma(), completion),
            NoopDelay::new(),
        );
        run_scenario(&mut uart);
        assert_eq!(bus.stats().delayed_ns, 0);
    }

    #[test]
    fn echoes_random_sequences() {
        let bus = SimBus::new(PCLK_HZ);
        let (mut uart, _) = dma_uart(&bus, OneWireUartBuilder::default());
        assert_echo(&mut uart, &mut StdRng::seed_from_u64(7));
        assert_eq!(bus.stats().start_order_faults, 0);
    }

    #[test]
    fn empty_exchange_touches_nothing() {
        let bus = SimBus::new(PCLK_HZ);
        let (mut uart, completion) = dma_uart(&bus, OneWireUartBuilder::default());
        uart.configure(DATA_BAUD).unwrap();
        let mut rx = [0xa5; 4];
        uart.transfer(&[], &mut rx).unwrap();
        uart.transfer_in_place(&mut []).unwrap();
        assert_eq!(rx, [0xa5; 4]);
        assert_eq!(bus.stats().bytes, 0);
        assert_eq!(bus.stats().interrupts, 0);
        assert!(!completion.is_done());
    }

    #[test]
    fn bring_up_wires_streams_to_data_register() {
        let bus = SimBus::new(PCLK_HZ);
        let (mut uart, _) = dma_uart(&bus, OneWireUartBuilder::default());
        uart.configure(RESET_BAUD).unwrap();

        for (channel, direction) in [
            (Channel::Rx, TransferDirection::PeripheralToMemory),
            (Channel::Tx, TransferDirection::MemoryToPeripheral),
        ] {
            let config = bus.stream_config(channel);
            assert_eq!(config.direction(), direction);
            assert_eq!(config.channel(), DEFAULT_REQUEST_CHANNEL);
            assert!(config.memory_increment());
            assert!(!config.peripheral_increment());
            assert!(!config.circular());
            assert_eq!(bus.stream_peripheral_address(channel), DATA_REGISTER_ADDRESS);
        }
        assert_eq!(bus.interrupt_priority(), Some(COMPLETION_IRQ_PRIORITY));
    }

    #[test]
    fn irq_priority_is_fixed() {
        let bus = SimBus::new(PCLK_HZ);
        let builder = OneWireUartBuilder::default()
            .with_timeout_us(1_000)
            .with_pin_config(PinConfig {
                speed: Speed::High,
                ..PinConfig::default()
            });
        let (mut uart, _) = dma_uart(&bus, builder);
        uart.configure(RESET_BAUD).unwrap();
        uart.configure(DATA_BAUD).unwrap();
        assert_eq!(bus.interrupt_priority(), Some(COMPLETION_IRQ_PRIORITY));
        assert_eq!(bus.stats().interrupt_enables, 1);
    }

    #[test]
    fn reconfiguration_repeats_no_wiring() {
        let bus = SimBus::new(PCLK_HZ);
        let (mut uart, _) = dma_uart(&bus, OneWireUartBuilder::default());
        uart.configure(RESET_BAUD).unwrap();
        let after_bring_up = bus.stats();
        assert_eq!(after_bring_up.clock_enables, 1);
        assert_eq!(after_bring_up.pin_configurations, 2);
        assert_eq!(after_bring_up.dma_wirings, 2);
        assert_eq!(after_bring_up.interrupt_enables, 1);

        uart.configure(DATA_BAUD).unwrap();
        uart.configure(RESET_BAUD).unwrap();
        uart.configure(DATA_BAUD).unwrap();
        assert_eq!(bus.stats(), after_bring_up);
        assert_eq!(uart.state(), BusState::Configured { baud_rate: DATA_BAUD });
        assert_eq!(
            bus.baud_rate_register(),
            UsartBaudRate::for_rate(PCLK_HZ, DATA_BAUD).unwrap()
        );

        uart.transfer(&[0x33], &mut [0]).unwrap();
        assert_eq!(bus.stats().last_baud_rate, Some(115_226));
    }

    #[test]
    fn completion_fires_once_per_exchange_and_never_leaks() {
        let bus = SimBus::new(PCLK_HZ);
        let (mut uart, completion) =
            dma_uart(&bus, OneWireUartBuilder::default().with_timeout_us(1_000));
        uart.configure(DATA_BAUD).unwrap();
        assert!(!completion.is_done());

        for n in 1..=3 {
            let mut rx = [0; 2];
            uart.transfer(&[n, n], &mut rx).unwrap();
            assert_eq!(rx, [n, n]);
            assert!(completion.is_done());
            assert_eq!(bus.stats().interrupts, n as usize);
        }

        // A stalled bus must not be mistaken for the previous completion.
        bus.set_stalled(true);
        let mut rx = [0; 2];
        assert_eq!(
            uart.transfer(&[9, 9], &mut rx),
            Err(OneWireUartError::Timeout)
        );
        assert!(!completion.is_done());
        assert_eq!(bus.stats().interrupts, 3);
        assert!(!bus.stream_config(Channel::Tx).enable());
        assert!(!bus.stream_config(Channel::Rx).enable());

        bus.set_stalled(false);
        uart.transfer(&[7, 8], &mut rx).unwrap();
        assert_eq!(rx, [7, 8]);
        assert_eq!(bus.stats().interrupts, 4);
    }

    #[test]
    fn timeout_waits_for_streams_to_stop() {
        let bus = SimBus::new(PCLK_HZ);
        let (mut uart, _) = dma_uart(&bus, OneWireUartBuilder::default().with_timeout_us(100));
        uart.configure(DATA_BAUD).unwrap();

        bus.set_stalled(true);
        let mut rx = [0; 3];
        assert_eq!(
            uart.transfer(&[1, 2, 3], &mut rx),
            Err(OneWireUartError::Timeout)
        );
        // Both streams were caught draining and waited out before returning.
        assert_eq!(bus.stats().disable_waits, 2);
        assert!(!bus.stream_config(Channel::Tx).enable());
        assert!(!bus.stream_config(Channel::Rx).enable());
        assert!(bus.dma().flags(Channel::Rx).is_clear());

        bus.set_stalled(false);
        let mut rx = [0; 2];
        uart.transfer(&[4, 5], &mut rx).unwrap();
        assert_eq!(rx, [4, 5]);
        assert_eq!(bus.stats().writes_while_enabled, 0);
        assert_eq!(bus.stats().disable_waits, 2);
    }

    #[test]
    fn dma_requests_idle_between_exchanges() {
        let bus = SimBus::new(PCLK_HZ);
        let (mut uart, _) = dma_uart(&bus, OneWireUartBuilder::default());
        uart.configure(DATA_BAUD).unwrap();
        uart.transfer(&[1, 2, 3, 4], &mut [0; 4]).unwrap();

        let cr3 = bus.control3();
        assert!(!cr3.dma_rx());
        assert!(!cr3.dma_tx());
        assert!(bus.stream_config(Channel::Rx).transfer_complete_irq());
        assert!(bus.dma().flags(Channel::Rx).is_clear());
    }

    #[test]
    fn long_exchange_spans_several_blocks() {
        let bus = SimBus::new(PCLK_HZ);
        let (mut uart, _) = dma_uart(&bus, OneWireUartBuilder::default());
        uart.configure(DATA_BAUD).unwrap();

        let mut rng = StdRng::seed_from_u64(70_000);
        let mut tx = vec![0; 70_000];
        rng.fill(&mut tx[..]);
        let mut rx = vec![0; tx.len()];
        uart.transfer(&tx, &mut rx).unwrap();
        assert_eq!(rx, tx);
        assert_eq!(bus.stats().interrupts, 2);
    }

    #[test]
    fn in_place_exchange() {
        let bus = SimBus::new(PCLK_HZ);
        bus.set_responder(chatty_device);
        let (mut uart, _) = dma_uart(&bus, OneWireUartBuilder::default());
        uart.configure(DATA_BAUD).unwrap();

        let original = [0x00, 0x5a, 0xff, 0x81];
        let mut buf = original;
        uart.transfer_in_place(&mut buf).unwrap();
        for (got, sent) in buf.iter().zip(original) {
            assert_eq!(*got, sent & chatty_device(115_226, sent));
        }
    }

    #[test]
    fn matches_polling_on_the_same_bus_behaviour() {
        let mut rng = StdRng::seed_from_u64(42);
        let frames: Vec<(u32, Vec<u8>)> = (0..40)
            .map(|i| {
                let baud = if i % 4 == 0 { RESET_BAUD } else { DATA_BAUD };
                (baud, random_bytes(&mut rng, 32))
            })
            .chain([(RESET_BAUD, vec![0xf0])])
            .collect();

        let dma_bus = SimBus::new(PCLK_HZ);
        dma_bus.set_responder(chatty_device);
        let (mut dma_uart, _) = dma_uart(&dma_bus, OneWireUartBuilder::default());

        let polling_bus = SimBus::new(PCLK_HZ);
        polling_bus.set_responder(chatty_device);
        let mut polling_uart = polling_uart(&polling_bus);

        let by_dma = exchange_all(&mut dma_uart, &frames);
        let by_polling = exchange_all(&mut polling_uart, &frames);
        assert_eq!(by_dma, by_polling);
        assert_eq!(by_dma.last(), Some(&vec![0xe0]));
        assert_eq!(dma_bus.stats().bytes, polling_bus.stats().bytes);
    }

    #[test]
    fn release_masks_interrupt_and_stops_streams() {
        let bus = SimBus::new(PCLK_HZ);
        let (mut uart, completion) = dma_uart(&bus, OneWireUartBuilder::default());
        uart.configure(DATA_BAUD).unwrap();
        uart.transfer(&[0xcc], &mut [0]).unwrap();

        let (_usart, _platform, mode, _delay) = uart.release();
        let (_dma, released) = mode.release();
        assert!(core::ptr::eq(released, completion));
        assert!(!bus.control1().enable());
        assert_eq!(bus.interrupt_priority(), None);
        assert!(!completion.is_done());
    }
}
