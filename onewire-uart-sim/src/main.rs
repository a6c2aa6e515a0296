use clap::{Parser, ValueEnum};
use embedded_hal::delay::DelayNs;
use onewire_uart::{
    Completion, Dma, OneWireUart, OneWireUartBuilder, OneWireUartError, Platform, Polling,
    TransferMode, UsartRegisters, sim::SimBus,
};

/// Byte a 1-Wire master sends at reset timing to produce a reset pulse.
const RESET_PULSE: u8 = 0xf0;

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Mode {
    /// DMA streams completed by the receive interrupt
    Dma,
    /// One byte at a time on the status flags
    Polling,
}

/// Exchange bytes over a simulated 1-Wire UART bus
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Transfer mode
    #[arg(short, long, value_enum, default_value_t = Mode::Dma)]
    mode: Mode,
    /// Peripheral clock of the engine, in Hz
    #[arg(long, default_value_t = 84_000_000)]
    pclk: u32,
    /// Baud rate used for the reset pulse
    #[arg(long, default_value_t = 9600)]
    reset_baud: u32,
    /// Baud rate used for data time slots
    #[arg(long, default_value_t = 115_200)]
    data_baud: u32,
    /// Attach a device that answers reset pulses
    #[arg(short, long)]
    presence: bool,
    /// Bound every exchange to this many microseconds
    #[arg(short, long)]
    timeout_us: Option<u32>,
    /// Bytes to exchange at data rate, in hex
    #[arg(value_parser = parse_hex_byte, default_values = ["01", "02", "03"])]
    bytes: Vec<u8>,
}

fn parse_hex_byte(s: &str) -> Result<u8, String> {
    u8::from_str_radix(s.trim_start_matches("0x"), 16).map_err(|e| format!("{s}: {e}"))
}

fn run<U, P, M, D>(
    uart: &mut OneWireUart<U, P, M, D>,
    args: &Args,
) -> Result<(), OneWireUartError>
where
    U: UsartRegisters,
    P: Platform,
    M: TransferMode,
    D: DelayNs,
{
    uart.configure(args.reset_baud)?;
    let mut presence = [0; 1];
    uart.transfer(&[RESET_PULSE], &mut presence)?;
    if presence[0] == RESET_PULSE {
        log::info!("Reset at {} Bd: no presence pulse", args.reset_baud);
    } else {
        log::info!(
            "Reset at {} Bd: presence pulse (read back {:#04x})",
            args.reset_baud,
            presence[0]
        );
    }

    uart.configure(args.data_baud)?;
    let mut rx = vec![0; args.bytes.len()];
    uart.transfer(&args.bytes, &mut rx)?;
    log::info!("Sent {:02x?} at {} Bd", args.bytes, args.data_baud);
    log::info!("Read {:02x?}", rx);
    Ok(())
}

fn main() -> Result<(), OneWireUartError> {
    // Initialize the logger
    env_logger::init();
    // Parse command line arguments
    let args = Args::parse();
    // Build the simulated bus
    let bus = SimBus::new(args.pclk);
    if args.presence {
        bus.set_responder(move |baud, byte| {
            if byte == RESET_PULSE && baud < 20_000 {
                0xe0
            } else {
                0xff
            }
        });
    }
    let mut builder = OneWireUartBuilder::default();
    if let Some(timeout_us) = args.timeout_us {
        builder = builder.with_timeout_us(timeout_us);
    }

    match args.mode {
        Mode::Dma => {
            let completion: &'static Completion = Box::leak(Box::new(Completion::new()));
            bus.attach_completion(completion);
            let mode = Dma::new(bus.dma(), completion);
            let mut uart = builder.build(bus.usart(), bus.platform(), mode, bus.delay());
            run(&mut uart, &args)?;
        }
        Mode::Polling => {
            let mut uart = builder.build(bus.usart(), bus.platform(), Polling, bus.delay());
            run(&mut uart, &args)?;
        }
    }

    let stats = bus.stats();
    log::info!(
        "{} bytes on the wire, {} us of bus time, {} interrupts",
        stats.bytes,
        stats.bus_time_ns / 1_000,
        stats.interrupts
    );
    Ok(())
}
