//! Device info, image info and bus listing command implementations.

use {
    super::{flash::load_image, json_ok},
    crate::{Cli, config::Config, connect::open_device},
    anyhow::{Context, Result},
    console::style,
    ephlink::{FirmwareImage, discover_buses},
    std::path::Path,
};

/// Read and print the device information record.
pub(crate) fn cmd_info(cli: &Cli, config: &Config, json: bool) -> Result<()> {
    let device = open_device(cli, config)?;
    let info = device
        .read_device_info()
        .context("Failed to read device info")?;

    if json {
        let mut data = serde_json::to_value(info)?;
        data["application_version"] = info
            .application_version()
            .into();
        data["requires_command_crc"] = info
            .requires_command_crc()
            .into();
        data["link"] = device
            .link_name()
            .into();
        println!(
            "{}",
            serde_json::to_string_pretty(&json_ok(data))?
        );
        return Ok(());
    }

    eprintln!(
        "{}",
        style("Device Information")
            .bold()
            .underlined()
    );
    eprintln!("  Link:          {}", device.link_name());
    eprintln!("  Product:       0x{:02X}", info.product_id);
    eprintln!("  Variant:       0x{:02X}", info.variant_id);
    eprintln!("  Application:   {}", info.application_version());
    eprintln!("  Bootloader:    {}", info.bootloader_version);
    eprintln!(
        "  Protocol:      {}{}",
        info.protocol_version,
        if info.requires_command_crc() {
            " (CRC on control/config commands)"
        } else {
            ""
        }
    );
    Ok(())
}

fn image_json(image: &FirmwareImage) -> serde_json::Value {
    let frames: Vec<serde_json::Value> = image
        .frames()
        .map(|frame| {
            serde_json::json!({
                "index": frame.index,
                "offset": frame.offset,
                "length": frame.data.len(),
                "last": frame.is_last,
            })
        })
        .collect();
    let info = image
        .info()
        .map(|info| {
            serde_json::json!({
                "product_id": info.product_id,
                "variant_id": info.variant_id,
                "application_version": info.application_version(),
                "bootloader_version": info.bootloader_version,
                "crc": format!("0x{:02X}", info.crc),
                "crc_valid": info.crc_valid(),
            })
        });
    serde_json::json!({
        "size": image.len(),
        "frame_count": image.frame_count(),
        "payload_len": image.payload_len(),
        "info": info,
        "frames": frames,
    })
}

/// Show the frame layout of a firmware image.
pub(crate) fn cmd_image_info(path: &Path, info_header: bool, json: bool) -> Result<()> {
    let image = load_image(path, info_header)?;

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&json_ok(image_json(&image)))?
        );
        return Ok(());
    }

    eprintln!(
        "{}",
        style("Firmware Image")
            .bold()
            .underlined()
    );
    eprintln!("  File:          {}", path.display());
    eprintln!("  Size:          {} bytes", image.len());
    eprintln!("  Frames:        {}", image.frame_count());
    eprintln!("  Payload:       {} bytes", image.payload_len());

    if let Some(info) = image.info() {
        eprintln!(
            "\n{}",
            style("Info Header")
                .bold()
                .underlined()
        );
        eprintln!("  Product:       0x{:02X}", info.product_id);
        eprintln!("  Variant:       0x{:02X}", info.variant_id);
        eprintln!("  Application:   {}", info.application_version());
        eprintln!("  Bootloader:    {}", info.bootloader_version);
        eprintln!(
            "  CRC:           0x{:02X} ({})",
            info.crc,
            if info.crc_valid() {
                style("valid").green()
            } else {
                style("INVALID").red()
            }
        );
    }

    eprintln!(
        "\n{}",
        style("Frames")
            .bold()
            .underlined()
    );
    for frame in image.frames() {
        eprintln!(
            "  [{:4}] @ 0x{:06X} {:5} bytes{}",
            frame.index,
            frame.offset,
            frame.data.len(),
            if frame.is_last {
                style(" (last)")
                    .yellow()
                    .to_string()
            } else {
                String::new()
            }
        );
    }
    Ok(())
}

/// List SPI and I2C bus nodes.
pub(crate) fn cmd_list_buses(json: bool) -> Result<()> {
    let buses = discover_buses();

    if json {
        let output = json_ok(serde_json::json!({
            "buses": buses,
        }));
        println!(
            "{}",
            serde_json::to_string_pretty(&output)?
        );
        return Ok(());
    }

    eprintln!(
        "{}",
        style("Available Buses")
            .bold()
            .underlined()
    );
    if buses.is_empty() {
        eprintln!("  {}", style("No SPI or I2C buses found").dim());
    } else {
        for bus in &buses {
            eprintln!(
                "  {} {} [{}]",
                style("•").green(),
                style(bus.path.display()).cyan(),
                style(bus.kind).yellow()
            );
        }
    }
    Ok(())
}
