use anyhow::Context;
use modbus_electricity_meter::{MeterConfig, ModbusElectricityMeter, TcpSession};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    info!("Starting Modbus electricity meter");
    let config = MeterConfig::from_env()?;

    info!(address = %config.modbus_address, slave_id = ?config.slave_id, "connecting");
    let session = TcpSession::connect(config.modbus_address, config.slave_id)
        .await
        .with_context(|| format!("Cant connect to meter at {}", config.modbus_address))?;
    info!("connected");

    let meter = ModbusElectricityMeter::from_config(&config, session);
    meter.start()?;
    meter.start_energy_meter();
    info!(
        appliance_id = meter.appliance_id(),
        energy_source = ?meter.energy_source(),
        "polling"
    );

    let mut windows = meter.subscribe_power();
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            changed = windows.changed() => {
                if changed.is_err() {
                    break;
                }
                let window = *windows.borrow_and_update();
                info!(
                    appliance_id = meter.appliance_id(),
                    min = window.min,
                    avg = window.avg,
                    max = window.max,
                    samples = window.sample_count,
                    energy_wh = meter.energy(),
                    "measurement interval completed"
                );
            }
            _ = &mut shutdown => {
                info!("shutting down");
                break;
            }
        }
    }

    meter.stop_energy_meter();
    meter.stop();
    Ok(())
}
