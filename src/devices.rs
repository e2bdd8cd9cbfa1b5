use async_trait::async_trait;
use log::{info, warn};
use tokio::process::Command;

use crate::error::CaptureError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceKind {
    VideoInput,
    // The rpicam listing only reports cameras
    #[cfg(test)]
    AudioInput,
    #[cfg(test)]
    AudioOutput,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Device {
    pub id: String,
    pub label: String,
    pub kind: DeviceKind,
}

/// Host facility that lists media devices.
#[async_trait]
pub trait DeviceSource: Send + Sync {
    async fn list_devices(&self) -> Result<Vec<Device>, CaptureError>;
}

/// Lists video inputs once; an unavailable source degrades to no devices.
pub async fn enumerate_video_devices(source: &dyn DeviceSource) -> Vec<Device> {
    match source.list_devices().await {
        Ok(devices) => {
            let video: Vec<Device> = devices
                .into_iter()
                .filter(|d| d.kind == DeviceKind::VideoInput)
                .collect();
            info!("Found {} video input device(s)", video.len());
            for device in &video {
                info!("  camera {}: {}", device.id, device.label);
            }
            video
        }
        Err(e) => {
            warn!("{}. Continuing without a device list.", e);
            Vec::new()
        }
    }
}

/// Cameras reported by `rpicam-still --list-cameras`.
pub struct RpicamDeviceSource {
    program: String,
}

impl RpicamDeviceSource {
    pub fn new() -> Self {
        Self::with_program("rpicam-still")
    }

    pub fn with_program(program: &str) -> Self {
        Self {
            program: program.to_string(),
        }
    }
}

impl Default for RpicamDeviceSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DeviceSource for RpicamDeviceSource {
    async fn list_devices(&self) -> Result<Vec<Device>, CaptureError> {
        let output = Command::new(&self.program)
            .arg("--list-cameras")
            .output()
            .await
            .map_err(|e| CaptureError::DeviceEnumerationUnavailable(format!("{} not runnable: {}", self.program, e)))?;

        // rpicam prints the listing on stderr on some releases and stdout on others
        let mut listing = String::from_utf8_lossy(&output.stdout).to_string();
        listing.push_str(&String::from_utf8_lossy(&output.stderr));

        if !output.status.success() && parse_camera_list(&listing).is_empty() {
            return Err(CaptureError::DeviceEnumerationUnavailable(format!(
                "{} --list-cameras exited with {}",
                self.program, output.status
            )));
        }

        Ok(parse_camera_list(&listing))
    }
}

/// Parse lines like `0 : imx219 [3280x2464 10-bit RGGB] (/base/soc/i2c0mux/i2c@1/imx219@10)`.
pub fn parse_camera_list(listing: &str) -> Vec<Device> {
    listing
        .lines()
        .filter_map(|line| {
            let (index, rest) = line.trim().split_once(" : ")?;
            let index: u32 = index.trim().parse().ok()?;

            let sensor = rest.split(['[', '(']).next()?.trim();
            if sensor.is_empty() {
                return None;
            }

            let path = rest
                .rsplit_once('(')
                .and_then(|(_, p)| p.strip_suffix(')'))
                .map(str::trim);

            let label = match path {
                Some(p) if !p.is_empty() => format!("{} ({})", sensor, p),
                _ => sensor.to_string(),
            };

            Some(Device {
                id: index.to_string(),
                label,
                kind: DeviceKind::VideoInput,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const TWO_CAMERAS: &str = "Available cameras
-----------------
0 : imx219 [3280x2464 10-bit RGGB] (/base/soc/i2c0mux/i2c@1/imx219@10)
    Modes: 'SRGGB10_CSI2P' : 640x480 [206.65 fps - (1000, 752)/1280x960 crop]
                             1640x1232 [41.85 fps - (0, 0)/3280x2464 crop]
1 : imx477 [4056x3040 12-bit RGGB] (/base/axi/pcie@120000/rp1/i2c@88000/imx477@1a)
    Modes: 'SRGGB12_CSI2P' : 2028x1080 [50.03 fps - (0, 440)/4056x2160 crop]
";

    struct FixedSource(Result<Vec<Device>, CaptureError>);

    #[async_trait]
    impl DeviceSource for FixedSource {
        async fn list_devices(&self) -> Result<Vec<Device>, CaptureError> {
            self.0.clone()
        }
    }

    fn device(id: &str, kind: DeviceKind) -> Device {
        Device {
            id: id.to_string(),
            label: format!("device {}", id),
            kind,
        }
    }

    #[test]
    fn test_parse_two_cameras() {
        let devices = parse_camera_list(TWO_CAMERAS);
        assert_eq!(devices.len(), 2);
        assert_eq!(devices[0].id, "0");
        assert_eq!(devices[0].label, "imx219 (/base/soc/i2c0mux/i2c@1/imx219@10)");
        assert_eq!(devices[1].id, "1");
        assert!(devices[1].label.starts_with("imx477"));
        assert!(devices.iter().all(|d| d.kind == DeviceKind::VideoInput));
    }

    #[test]
    fn test_parse_no_cameras() {
        assert!(parse_camera_list("No cameras available!\n").is_empty());
        assert!(parse_camera_list("").is_empty());
    }

    #[tokio::test]
    async fn test_enumeration_keeps_video_inputs_only() {
        let source = FixedSource(Ok(vec![
            device("mic", DeviceKind::AudioInput),
            device("0", DeviceKind::VideoInput),
            device("speaker", DeviceKind::AudioOutput),
            device("1", DeviceKind::VideoInput),
        ]));

        let devices = enumerate_video_devices(&source).await;
        let ids: Vec<&str> = devices.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["0", "1"]);
    }

    #[tokio::test]
    async fn test_enumeration_failure_yields_empty_list() {
        let source = FixedSource(Err(CaptureError::DeviceEnumerationUnavailable(
            "denied".to_string(),
        )));
        assert!(enumerate_video_devices(&source).await.is_empty());
    }

    #[tokio::test]
    async fn test_missing_program_is_unavailable() {
        let source = RpicamDeviceSource::with_program("snapscan-no-such-camera-tool");
        let err = source.list_devices().await.unwrap_err();
        assert!(matches!(err, CaptureError::DeviceEnumerationUnavailable(_)));
        assert!(enumerate_video_devices(&source).await.is_empty());
    }
}
