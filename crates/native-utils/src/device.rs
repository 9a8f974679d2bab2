use anyhow::Context;
use cpal::Device;
use cpal::traits::{DeviceTrait, HostTrait};

fn get_host() -> cpal::Host {
    cpal::default_host()
}

// Finds the input device with the given name, or the host's default input device.
pub fn get_or_default_input(device_name: Option<String>) -> anyhow::Result<Device> {
    let host = get_host();
    tracing::debug!("Host: {:?}", host.id());

    let Some(target) = device_name else {
        return host
            .default_input_device()
            .context("No default input device");
    };

    host.input_devices()
        .context("Failed to enumerate input devices")?
        .find(|d| d.name().is_ok_and(|name| name == target))
        .ok_or_else(|| anyhow::anyhow!("No input device named {target}"))
}

/// Lists input devices with their default channel count and sample rate.
pub fn get_available_inputs() -> anyhow::Result<String> {
    for host in cpal::available_hosts() {
        tracing::debug!("Available host: {:?}", host);
    }

    let host = get_host();
    let default_device = host
        .default_input_device()
        .and_then(|d| d.name().ok())
        .unwrap_or_default();

    let mut device_names: Vec<String> = Vec::new();
    for in_device in host.input_devices()? {
        let d_name = in_device.name().unwrap_or_else(|_| "<unnamed>".to_string());
        let mut d = match in_device.default_input_config() {
            Ok(cfg) => format!(
                " * {}({}ch, {}hz)",
                d_name,
                cfg.channels(),
                cfg.sample_rate().0
            ),
            Err(_) => format!(" * {}(no default config)", d_name),
        };
        if d_name == default_device {
            d.push_str(" [default]");
        }
        device_names.push(d);
    }
    Ok(device_names.join("\n"))
}
