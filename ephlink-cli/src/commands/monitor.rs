//! Report monitor command implementation.
//!
//! Waits on the ready line (or polls when none is wired), services each
//! interrupt and prints every buffered report as one hex line on stdout.
//! Ctrl-C ends the monitor cleanly.

use {
    crate::{Cli, config::Config, connect::open_app_device, hex_line, was_interrupted},
    anyhow::{Context, Result},
    console::style,
    ephlink::Error,
    log::{debug, trace},
    std::{io, io::Write as _, thread, time::Duration},
};

/// Pause between polls when the device had nothing queued.
const IDLE_POLL: Duration = Duration::from_millis(10);

/// Run the report monitor.
pub(crate) fn cmd_monitor(cli: &Cli, config: &Config, count: Option<usize>) -> Result<()> {
    let device = open_app_device(cli, config)?;
    if !cli.quiet {
        eprintln!(
            "{} Monitoring {}",
            style("📡").cyan(),
            style(device.link_name()).green()
        );
        eprintln!("{}", style("Press Ctrl+C to exit").dim());
    }

    let mut printed = 0;
    let mut stdout = io::stdout();
    while count.is_none_or(|limit| printed < limit) {
        if was_interrupted() {
            debug!("Monitor stopped by Ctrl-C");
            break;
        }

        match device.wait_ready() {
            Ok(()) => {},
            Err(Error::Timeout(_)) => continue,
            Err(e) => return Err(e).context("Ready line failed"),
        }

        match device
            .service_interrupt()
            .context("Reading report failed")?
        {
            Some(message) => {
                trace!("Serviced {}", message.tlv_type());
                let report = device.read_report();
                if report.is_null() {
                    continue;
                }
                writeln!(stdout, "{}", hex_line(report.as_bytes()))?;
                stdout.flush()?;
                printed += 1;
            },
            None => thread::sleep(IDLE_POLL),
        }
    }

    if !cli.quiet {
        eprintln!("{} {printed} reports", style("✓").green());
    }
    Ok(())
}
