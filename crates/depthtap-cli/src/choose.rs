//! Interactive device selection

use anyhow::{Context as _, Result};
use depthtap_session::DeviceDescriptor;
use std::io::{BufRead, Write};

/// List `devices` on `prompt` and read a 1-based device number from `input`.
/// An empty answer (or end of input) picks the first device.
pub fn choose_device<R: BufRead, W: Write>(
    devices: &[DeviceDescriptor],
    input: &mut R,
    prompt: &mut W,
) -> Result<usize> {
    if devices.is_empty() {
        anyhow::bail!("No depth devices are attached");
    }

    for device in devices {
        writeln!(prompt, "{}", device.listing_line())?;
    }
    write!(prompt, "Choose device to open (1): ")?;
    prompt.flush()?;

    let mut answer = String::new();
    input.read_line(&mut answer).context("Failed to read device choice")?;
    let answer = answer.trim();
    if answer.is_empty() {
        return Ok(1);
    }

    let index: usize = answer
        .parse()
        .with_context(|| format!("'{}' is not a device number", answer))?;
    if index == 0 || index > devices.len() {
        anyhow::bail!(
            "Device number {} is out of range: {} device(s) attached, numbering starts at 1",
            index,
            devices.len()
        );
    }
    Ok(index)
}

#[cfg(test)]
mod tests {
    use super::*;
    use depthtap_session::{SensorDriver, SimulatedDriver};
    use std::io::Cursor;

    fn devices() -> Vec<DeviceDescriptor> {
        SimulatedDriver::new()
            .with_device("Kinect", "A00364911500036A")
            .with_device("Xtion", "1207250156")
            .enumerate_devices()
            .unwrap()
    }

    #[test]
    fn test_lists_devices_and_reads_choice() {
        let mut prompt = Vec::new();
        let index = choose_device(&devices(), &mut Cursor::new("2\n"), &mut prompt).unwrap();
        assert_eq!(index, 2);
        assert_eq!(
            String::from_utf8(prompt).unwrap(),
            "[1] Kinect (A00364911500036A)\n[2] Xtion (1207250156)\nChoose device to open (1): "
        );
    }

    #[test]
    fn test_empty_answer_picks_first_device() {
        let mut sink = Vec::new();
        assert_eq!(choose_device(&devices(), &mut Cursor::new("\n"), &mut sink).unwrap(), 1);
        assert_eq!(choose_device(&devices(), &mut Cursor::new(""), &mut sink).unwrap(), 1);
    }

    #[test]
    fn test_rejects_bad_answers() {
        let mut sink = Vec::new();
        let err = choose_device(&devices(), &mut Cursor::new("3\n"), &mut sink).unwrap_err();
        assert!(err.to_string().contains("out of range"));
        let err = choose_device(&devices(), &mut Cursor::new("kinect\n"), &mut sink).unwrap_err();
        assert!(err.to_string().contains("not a device number"));
    }

    #[test]
    fn test_no_devices() {
        let mut sink = Vec::new();
        assert!(choose_device(&[], &mut Cursor::new("1\n"), &mut sink).is_err());
        assert!(sink.is_empty());
    }
}
