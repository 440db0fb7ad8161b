pub mod cli;

use std::io::{self, Read, Write};
use std::sync::mpsc::{self, TryRecvError};
use std::thread;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{anyhow, Context, Result};
use clap::{CommandFactory, Parser};
use clap_complete::{generate, shells::Bash};
use log::{error, warn};

use nsp32_lib::adaptor::SerialAdaptor;
use nsp32_lib::port;
use nsp32_lib::protocol::place_checksum;
use nsp32_lib::record::{self, AcqSettings, Record, WavelengthRange};
use nsp32_lib::{Channel, EngineConfig, McuAdaptor, Nsp32, ReadyTrigger, RetryPolicy};

use cli::{AcqArgs, Cli};

const POLL_INTERVAL: Duration = Duration::from_millis(5);

enum OutputFormat {
    Plain,
    Json,
}

fn slice_to_line<T: ToString>(data: &[T]) -> String {
    data.iter()
        .map(|x| x.to_string())
        .collect::<Vec<String>>()
        .join(" ")
}

fn packet_to_string(packet: &[u8], fmt: &OutputFormat) -> String {
    match fmt {
        OutputFormat::Plain => packet
            .iter()
            .map(|b| format!("{:02X}", b))
            .collect::<Vec<String>>()
            .join(" "),
        OutputFormat::Json => json::stringify(packet.to_vec()),
    }
}

fn timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

/// Polls the engine until a return packet shows up.
fn wait_for_packet<A: McuAdaptor>(nsp: &mut Nsp32<A>) -> Result<()> {
    while nsp.return_packet_size() == 0 {
        nsp.update_status()
            .context("Failed to fetch acquisition result")?;
        thread::sleep(POLL_INTERVAL);
    }
    Ok(())
}

fn cmd_hello<A: McuAdaptor>(nsp: &mut Nsp32<A>, user_code: u8, fmt: OutputFormat) -> Result<String> {
    nsp.hello(user_code).context("Hello failed")?;
    Ok(nsp
        .return_packet()
        .map(|p| packet_to_string(p, &fmt))
        .unwrap_or_default())
}

fn cmd_standby<A: McuAdaptor>(nsp: &mut Nsp32<A>, user_code: u8, fmt: OutputFormat) -> Result<String> {
    nsp.standby(user_code).context("Standby failed")?;
    Ok(nsp
        .return_packet()
        .map(|p| packet_to_string(p, &fmt))
        .unwrap_or_default())
}

fn cmd_sensor_id<A: McuAdaptor>(nsp: &mut Nsp32<A>, user_code: u8, fmt: OutputFormat) -> Result<String> {
    nsp.get_sensor_id(user_code)
        .context("Failed to read sensor id")?;
    let id = nsp.extract_sensor_id();

    Ok(match fmt {
        OutputFormat::Plain => id.to_string(),
        OutputFormat::Json => json::stringify(id.as_str()),
    })
}

fn cmd_wavelength<A: McuAdaptor>(nsp: &mut Nsp32<A>, user_code: u8, fmt: OutputFormat) -> Result<String> {
    nsp.get_wavelength(user_code)
        .context("Failed to read wavelength table")?;
    let wavelengths = nsp.extract_wavelength_info().wavelengths.to_vec();

    Ok(match fmt {
        OutputFormat::Plain => slice_to_line(&wavelengths),
        OutputFormat::Json => json::stringify(wavelengths),
    })
}

fn cmd_spectrum<A: McuAdaptor>(
    nsp: &mut Nsp32<A>,
    user_code: u8,
    args: AcqArgs,
    fmt: OutputFormat,
) -> Result<String> {
    nsp.acq_spectrum(user_code, args.integration_time, args.frame_avg, args.auto_exposure)
        .context("Failed to start spectrum acquisition")?;
    wait_for_packet(nsp)?;

    let info = nsp.extract_spectrum_info();
    let record = Record::from_spectrum(&info, AcqSettings::from(args), true, timestamp());

    if args.csv {
        return Ok(format!(
            "{}\n{}",
            record::header(&WavelengthRange::default()),
            record.to_row()
        ));
    }

    Ok(match fmt {
        OutputFormat::Plain => format!(
            "integration time {}{}\nX {} Y {} Z {}\n{}",
            record.settings.integration_time,
            if record.is_saturated { " (saturated)" } else { "" },
            record.x,
            record.y,
            record.z,
            slice_to_line(&record.spectrum)
        ),
        OutputFormat::Json => {
            let mut obj = json::JsonValue::new_object();
            obj["integration_time"] = record.settings.integration_time.into();
            obj["saturated"] = record.is_saturated.into();
            obj["x"] = record.x.into();
            obj["y"] = record.y.into();
            obj["z"] = record.z.into();
            obj["spectrum"] = record.spectrum.clone().into();
            json::stringify(obj)
        }
    })
}

fn cmd_xyz<A: McuAdaptor>(
    nsp: &mut Nsp32<A>,
    user_code: u8,
    args: AcqArgs,
    fmt: OutputFormat,
) -> Result<String> {
    nsp.acq_xyz(user_code, args.integration_time, args.frame_avg, args.auto_exposure)
        .context("Failed to start XYZ acquisition")?;
    wait_for_packet(nsp)?;

    let info = nsp.extract_xyz_info();
    let record = Record::from_xyz(&info, AcqSettings::from(args), true, timestamp());

    if args.csv {
        return Ok(format!(
            "{}\n{}",
            record::xyz_header(),
            record.to_row()
        ));
    }

    Ok(match fmt {
        OutputFormat::Plain => format!(
            "integration time {}{}\nX {} Y {} Z {}",
            record.settings.integration_time,
            if record.is_saturated { " (saturated)" } else { "" },
            record.x,
            record.y,
            record.z
        ),
        OutputFormat::Json => {
            let mut obj = json::JsonValue::new_object();
            obj["integration_time"] = record.settings.integration_time.into();
            obj["saturated"] = record.is_saturated.into();
            obj["x"] = record.x.into();
            obj["y"] = record.y.into();
            obj["z"] = record.z.into();
            json::stringify(obj)
        }
    })
}

fn cmd_raw<A: McuAdaptor>(nsp: &mut Nsp32<A>, frame: &[u8], fmt: OutputFormat) -> Result<String> {
    let mut cmd = frame.to_vec();
    cmd.push(0);
    place_checksum(&mut cmd, frame.len());

    cmd.iter().for_each(|&b| nsp.fwd_cmd_byte(b));
    nsp.update_status().context("Failed to send frame")?;

    if nsp.pending_async().is_some() {
        wait_for_packet(nsp)?;
    }

    nsp.return_packet()
        .map(|p| packet_to_string(p, &fmt))
        .ok_or_else(|| anyhow!("Frame {:02X?} rejected", cmd))
}

/// Dispatches whatever the relay holds and writes the return packet out.
fn relay_step<A: McuAdaptor, W: Write>(nsp: &mut Nsp32<A>, out: &mut W) -> Result<()> {
    if let Err(e) = nsp.update_status() {
        warn!("relay: {:#}", anyhow::Error::from(e));
    }

    if let Some(packet) = nsp.return_packet() {
        out.write_all(packet)?;
        out.flush()?;
        nsp.clear_return_packet();
    }

    Ok(())
}

fn cmd_forward<A: McuAdaptor>(nsp: &mut Nsp32<A>) -> Result<String> {
    let (tx, rx) = mpsc::channel();

    thread::spawn(move || {
        for byte in io::stdin().lock().bytes() {
            match byte {
                Ok(b) if tx.send(b).is_ok() => (),
                _ => return,
            }
        }
    });

    let mut out = io::stdout();
    let mut upstream_open = true;

    while upstream_open || nsp.pending_async().is_some() {
        loop {
            match rx.try_recv() {
                Ok(b) => {
                    nsp.fwd_cmd_byte(b);
                    if nsp.fwd_cmd_filled() {
                        relay_step(nsp, &mut out)?;
                    }
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    upstream_open = false;
                    break;
                }
            }
        }

        relay_step(nsp, &mut out)?;
        thread::sleep(POLL_INTERVAL);
    }

    Ok(String::new())
}

fn retry_policy(retries: usize) -> RetryPolicy {
    match retries {
        0 => RetryPolicy::Unbounded,
        n => RetryPolicy::Limited(n),
    }
}

fn do_main() -> Result<String> {
    if std::env::var("GENERATE_COMPLETION").is_ok() {
        generate(
            Bash,
            &mut cli::Cli::command(),
            "nsp32-tool",
            &mut io::stdout(),
        );

        return Ok(String::default());
    }

    let cli = Cli::parse();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(if cli.debug {
        "debug"
    } else {
        "info"
    }))
    .format_timestamp(None)
    .format_target(false)
    .init();

    let fmt = if cli.json {
        OutputFormat::Json
    } else {
        OutputFormat::Plain
    };

    let port = port::open_port(&cli.port, cli.baudrate, cli.force)?;
    let adaptor = SerialAdaptor::new(port, cli.baudrate);
    let trigger = ReadyTrigger::new();
    adaptor
        .watch_ready_line(trigger.clone())
        .context("Failed to watch ready line")?;

    let config = EngineConfig {
        error_retry: retry_policy(cli.retries),
        wakeup: retry_policy(cli.retries),
        ready_timeout_ms: cli.ready_timeout,
    };
    let mut nsp = Nsp32::with_config(adaptor, Channel::Uart, trigger, config);
    nsp.init().context("Failed to wake up sensor")?;

    let user_code = cli.user_code;
    match cli.command {
        cli::Commands::Hello => cmd_hello(&mut nsp, user_code, fmt),
        cli::Commands::Standby => cmd_standby(&mut nsp, user_code, fmt),
        cli::Commands::SensorId => cmd_sensor_id(&mut nsp, user_code, fmt),
        cli::Commands::Wavelength => cmd_wavelength(&mut nsp, user_code, fmt),
        cli::Commands::Spectrum(args) => cmd_spectrum(&mut nsp, user_code, args, fmt),
        cli::Commands::Xyz(args) => cmd_xyz(&mut nsp, user_code, args, fmt),
        cli::Commands::Raw { frame } => cmd_raw(&mut nsp, &frame, fmt),
        cli::Commands::Forward => cmd_forward(&mut nsp),
    }
}

fn main() {
    match do_main() {
        Ok(s) if s.is_empty() => (),
        Ok(s) => println!("{}", s),
        Err(e) => error!("{:#}", e),
    }
}
