use cortex_m::interrupt;
use cortex_m::register::primask;
use critical_section::{self, RawRestoreState};
use defmt_rtt as _;
use embassy_executor::Spawner;
use embassy_stm32 as hal;
use embassy_stm32::gpio::{Input, Level, Output, Pull, Speed};
use embassy_stm32::usart::{BufferedUart, Config as UartConfig, DataBits, Parity, StopBits};
use embassy_sync::channel::Channel;
use static_cell::StaticCell;

use crate::config;
use crate::hw::{PanelInputs, PiezoBuzzer, StackLight};
use crate::modem::AtModem;
use crate::telemetry::{ChannelSink, ReportQueue};
use cycle_core::cycle::CycleController;

mod cycle_task;
mod network_task;

const MODEM_UART_BAUD: u32 = 115_200;
const MODEM_BUFFER_SIZE: usize = 256;

critical_section::set_impl!(InterruptCriticalSection);

struct InterruptCriticalSection;

unsafe impl critical_section::Impl for InterruptCriticalSection {
    unsafe fn acquire() -> RawRestoreState {
        let primask = primask::read();
        interrupt::disable();
        primask.is_active()
    }

    unsafe fn release(restore_state: RawRestoreState) {
        if restore_state {
            unsafe {
                interrupt::enable();
            }
        }
    }
}

embassy_stm32::bind_interrupts!(struct UartIrqs {
    USART3_4_5_6_LPUART1 => embassy_stm32::usart::BufferedInterruptHandler<hal::peripherals::USART5>;
});

pub(super) type FirmwareController =
    CycleController<PanelInputs<'static>, StackLight<'static>, PiezoBuzzer<'static>>;
pub(super) type FirmwareModem = AtModem<BufferedUart<'static>>;

pub(super) static REPORT_QUEUE: ReportQueue = Channel::new();

static MODEM_TX_BUFFER: StaticCell<[u8; MODEM_BUFFER_SIZE]> = StaticCell::new();
static MODEM_RX_BUFFER: StaticCell<[u8; MODEM_BUFFER_SIZE]> = StaticCell::new();

#[embassy_executor::main]
pub async fn main(spawner: Spawner) {
    let hal::Peripherals {
        PA2,
        PA3,
        PA4,
        PA5,
        PA6,
        PB0,
        PB1,
        USART5,
        ..
    } = hal::init(hal::Config::default());

    let inputs = PanelInputs::new(Input::new(PA4, Pull::Up), Input::new(PA5, Pull::Up));
    let light = StackLight::new(
        Output::new(PA2, Level::Low, Speed::Low),
        Output::new(PA3, Level::Low, Speed::Low),
    );
    let buzzer = PiezoBuzzer::new(Output::new(PA6, Level::Low, Speed::Low));

    let cycle_config = config::cycle_config().expect("machine code exceeds capacity");
    let controller = CycleController::with_components(cycle_config, inputs, light, buzzer);

    spawner
        .spawn(cycle_task::run(
            controller,
            ChannelSink::new(REPORT_QUEUE.sender()),
        ))
        .expect("failed to spawn cycle task");

    let mut uart_config = UartConfig::default();
    uart_config.baudrate = MODEM_UART_BAUD;
    uart_config.data_bits = DataBits::DataBits8;
    uart_config.stop_bits = StopBits::STOP1;
    uart_config.parity = Parity::ParityNone;

    let uart = BufferedUart::new(
        USART5,
        PB1,
        PB0,
        MODEM_TX_BUFFER.init([0; MODEM_BUFFER_SIZE]),
        MODEM_RX_BUFFER.init([0; MODEM_BUFFER_SIZE]),
        UartIrqs,
        uart_config,
    )
    .expect("failed to initialize modem UART");

    let network = config::network_config().expect("network settings exceed capacity");

    spawner
        .spawn(network_task::run(
            AtModem::new(uart),
            network,
            REPORT_QUEUE.receiver(),
        ))
        .expect("failed to spawn network task");

    core::future::pending::<()>().await;
}
